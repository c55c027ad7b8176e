// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#[cfg(test)]
mod tests {
    use crate::problem::{ProblemResponse, defaults, resolve_problem_type};
    use std::collections::HashMap;

    #[test]
    fn test_builtin_table_covers_expected_codes() {
        let table = &defaults().type_uri_map;
        for code in [
            "400", "401", "403", "404", "405", "406", "408", "409", "412", "415", "422", "426",
            "500", "502", "503", "504",
        ] {
            assert!(table.contains_key(code), "missing built-in entry for {code}");
        }
        assert_eq!(table.len(), 16);
    }

    #[test]
    fn test_mapped_code_wins() {
        let uri = resolve_problem_type("401", &defaults().type_uri_map);
        assert_eq!(uri, "https://datatracker.ietf.org/html/rfc9110#section-15.5.2");
    }

    #[test]
    fn test_class_fallbacks() {
        let empty = HashMap::new();
        assert_eq!(
            resolve_problem_type("418", &empty),
            "https://datatracker.ietf.org/doc/html/rfc9110#name-client-error-4xx"
        );
        assert_eq!(
            resolve_problem_type("503", &empty),
            "https://datatracker.ietf.org/doc/html/rfc9110#name-server-error-5xx"
        );
        // Unmapped code in the built-in table still falls back by class
        assert_eq!(
            resolve_problem_type("507", &defaults().type_uri_map),
            defaults().server_error_type_uri
        );
    }

    #[test]
    fn test_empty_mapping_falls_back() {
        let mut table = HashMap::new();
        table.insert("404".to_string(), String::new());
        assert_eq!(resolve_problem_type("404", &table), defaults().client_error_type_uri);
    }

    #[test]
    fn test_unknown_class_resolves_to_empty() {
        let empty = HashMap::new();
        assert_eq!(resolve_problem_type("302", &empty), "");
        assert_eq!(resolve_problem_type("0", &empty), "");
        assert_eq!(resolve_problem_type("", &empty), "");
    }

    #[test]
    fn test_problem_response_wire_shape() {
        let response = ProblemResponse {
            type_uri: "https://example.com/type".to_string(),
            title: "title".to_string(),
            status: 502,
            instance: "/foo".to_string(),
            trace_id: "abc".to_string(),
            detail: "upstream said \"no\"\n".to_string(),
        };

        let value: serde_json::Value = serde_json::from_slice(&response.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "https://example.com/type");
        assert_eq!(value["status"], 502);
        assert_eq!(value["instance"], "/foo");
        assert_eq!(value["trace_id"], "abc");
        assert_eq!(value["detail"], "upstream said \"no\"\n");
        assert_eq!(value.as_object().unwrap().len(), 6);
    }
}
