// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// Returns true if `request_url` contains any of `targets`.
///
/// This is substring containment, not an anchored prefix match: a target of
/// `my-host.com` selects `https://my-host.com/a` as well as
/// `https://api.my-host.com/b`.
pub fn matches_target<S: AsRef<str>>(request_url: &str, targets: &[S]) -> bool {
    targets
        .iter()
        .any(|target| request_url.contains(target.as_ref()))
}
