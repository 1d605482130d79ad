//! Emits GBNF grammar text from a parsed [`Schema`]. The canonical forms
//! below are part of the wire contract — engines compiled against the
//! emitted grammar must see exactly these rule bodies, not merely an
//! equivalent grammar.

use std::collections::HashSet;
use std::fmt::Write as _;

use serde_json::Value;

use crate::error::SchemaError;

use super::schema::{parse, ArrayItem, Leaf, Schema};

const WS_RULE: &str = "ws ::= [ \\t\\n]*\n";
const STRING_RULE: &str = "string ::= \"\\\"\" [^\"\\\\]* \"\\\"\"\n";
const NUMBER_RULE: &str = "number ::= \"-\"? [0-9]+ (\".\" [0-9]+)?\n";
const BOOLEAN_RULE: &str = "boolean ::= \"true\" | \"false\"\n";
const NESTED_OBJECT_RULE: &str = "nested-object ::= \"{\" ws \"}\"\n";
/// A single literal `"` token in GBNF source, i.e. `"\""`.
const QUOTE: &str = "\"\\\"\"";

/// Compiles a `response_format.json_schema.schema` value into GBNF text.
pub fn compile(schema: &Value) -> Result<String, SchemaError> {
    match parse(schema)? {
        Schema::Object(fields) => Ok(compile_object(&fields)),
        Schema::Array(item) => Ok(compile_top_level_array(&item)),
    }
}

fn compile_object(fields: &[(String, Leaf)]) -> String {
    if fields.is_empty() {
        return format!("root ::= \"{{\" ws \"}}\"\n{WS_RULE}");
    }

    let fragments: Vec<String> = fields
        .iter()
        .map(|(key, leaf)| format!("{QUOTE} \"{key}\" {QUOTE} ws \":\" ws {}", value_rule(leaf)))
        .collect();

    let mut grammar = if fragments.len() == 1 {
        format!("root ::= \"{{\" ws {} ws \"}}\"\n", fragments[0])
    } else {
        let joined = fragments.join(" ws \",\" ws ");
        format!("root ::= \"{{\" ws {joined} ws \"}}\"\n")
    };

    grammar.push_str(WS_RULE);
    grammar.push_str(STRING_RULE);
    grammar.push_str(NUMBER_RULE);
    grammar.push_str(BOOLEAN_RULE);
    grammar.push_str(NESTED_OBJECT_RULE);

    let mut emitted_helpers: HashSet<&'static str> = HashSet::new();
    for (_, leaf) in fields {
        if let Leaf::Array(item) = leaf {
            emit_array_helper(&mut grammar, item, &mut emitted_helpers);
        }
    }

    grammar
}

fn value_rule(leaf: &Leaf) -> String {
    match leaf {
        Leaf::String { enum_values: None } => "string".to_string(),
        Leaf::String {
            enum_values: Some(values),
        } => enum_alternation(values),
        Leaf::Number => "number".to_string(),
        Leaf::Boolean => "boolean".to_string(),
        Leaf::Array(ArrayItem::String) => "array-string".to_string(),
        Leaf::Array(ArrayItem::Number) => "array-number".to_string(),
        Leaf::Array(ArrayItem::StringEnum(_)) => "enum-array".to_string(),
        Leaf::NestedObject => "nested-object".to_string(),
    }
}

fn enum_alternation(values: &[String]) -> String {
    let alts: Vec<String> = values
        .iter()
        .map(|v| format!("{QUOTE} \"{v}\" {QUOTE}"))
        .collect();
    format!("({})", alts.join(" | "))
}

fn emit_array_helper(grammar: &mut String, item: &ArrayItem, emitted: &mut HashSet<&'static str>) {
    let name = match item {
        ArrayItem::String => "array-string",
        ArrayItem::Number => "array-number",
        ArrayItem::StringEnum(_) => "enum-array",
    };
    if !emitted.insert(name) {
        return;
    }
    match item {
        ArrayItem::String => {
            grammar.push_str("array-string ::= \"[\" ws (string (ws \",\" ws string)*)? ws \"]\"\n");
        }
        ArrayItem::Number => {
            grammar.push_str("array-number ::= \"[\" ws (number (ws \",\" ws number)*)? ws \"]\"\n");
        }
        ArrayItem::StringEnum(values) => {
            let alt = enum_alternation(values);
            let _ = writeln!(
                grammar,
                "enum-array ::= \"[\" ws (({alt}) (ws \",\" ws ({alt}))*)? ws \"]\""
            );
        }
    }
}

fn compile_top_level_array(item: &ArrayItem) -> String {
    match item {
        ArrayItem::String => format!(
            "root ::= \"[\" ws (string (ws \",\" ws string)*)? ws \"]\"\n{WS_RULE}{STRING_RULE}"
        ),
        ArrayItem::StringEnum(values) => {
            let alt = enum_alternation(values);
            format!(
                "root ::= \"[\" ws (({alt}) (ws \",\" ws ({alt}))*)? ws \"]\"\n{WS_RULE}"
            )
        }
        ArrayItem::Number => format!(
            "root ::= \"[\" ws (number (ws \",\" ws number)*)? ws \"]\"\n{WS_RULE}{NUMBER_RULE}"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_object_emits_minimal_grammar() {
        let schema = json!({"type": "object", "properties": {}});
        let gbnf = compile(&schema).unwrap();
        assert!(gbnf.starts_with("root ::= \"{\" ws \"}\"\n"));
        assert!(gbnf.contains("ws ::= [ \\t\\n]*"));
        assert!(!gbnf.contains("string ::="));
    }

    #[test]
    fn single_property_object_has_no_comma_join() {
        let schema = json!({
            "type": "object",
            "properties": { "name": {"type": "string"} },
        });
        let gbnf = compile(&schema).unwrap();
        assert!(gbnf.starts_with(
            "root ::= \"{\" ws \"\\\"\" \"name\" \"\\\"\" ws \":\" ws string ws \"}\"\n"
        ));
        assert!(!gbnf.contains("\",\""));
    }

    #[test]
    fn multi_property_object_joins_with_comma() {
        let schema = json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "age": {"type": "integer"},
            },
        });
        let gbnf = compile(&schema).unwrap();
        assert!(gbnf.contains("ws \",\" ws"));
        assert!(gbnf.contains("number ::="));
        assert!(gbnf.contains("boolean ::="));
        assert!(gbnf.contains("nested-object ::="));
    }

    #[test]
    fn enum_property_inlines_alternation() {
        let schema = json!({
            "type": "object",
            "properties": { "mood": {"type": "string", "enum": ["happy", "sad"]} },
        });
        let gbnf = compile(&schema).unwrap();
        assert!(gbnf.contains("(\"\\\"\" \"happy\" \"\\\"\" | \"\\\"\" \"sad\" \"\\\"\")"));
    }

    #[test]
    fn array_of_strings_emits_helper_once_even_with_two_properties() {
        let schema = json!({
            "type": "object",
            "properties": {
                "tags": {"type": "array", "items": {"type": "string"}},
                "aliases": {"type": "array", "items": {"type": "string"}},
            },
        });
        let gbnf = compile(&schema).unwrap();
        assert_eq!(gbnf.matches("array-string ::=").count(), 1);
    }

    #[test]
    fn array_of_number_items_emits_array_number_helper() {
        let schema = json!({
            "type": "object",
            "properties": { "scores": {"type": "array", "items": {"type": "number"}} },
        });
        let gbnf = compile(&schema).unwrap();
        assert!(gbnf.contains("array-number ::="));
    }

    #[test]
    fn enum_array_helper_matches_canonical_form() {
        let schema = json!({
            "type": "object",
            "properties": {
                "tags": {"type": "array", "items": {"type": "string", "enum": ["a", "b"]}},
            },
        });
        let gbnf = compile(&schema).unwrap();
        assert!(gbnf.contains("enum-array ::= \"[\" ws (("));
    }

    #[test]
    fn top_level_array_of_strings() {
        let schema = json!({"type": "array", "items": {"type": "string"}});
        let gbnf = compile(&schema).unwrap();
        assert!(gbnf.starts_with("root ::= \"[\" ws (string"));
        assert!(gbnf.contains("string ::="));
    }

    #[test]
    fn top_level_array_of_numbers() {
        let schema = json!({"type": "array", "items": {"type": "number"}});
        let gbnf = compile(&schema).unwrap();
        assert!(gbnf.contains("number ::="));
        assert!(!gbnf.contains("string ::="));
    }

    #[test]
    fn unsupported_construct_returns_schema_error() {
        let schema = json!({"type": "object", "properties": {"x": {"type": "null"}}});
        assert!(matches!(
            compile(&schema),
            Err(SchemaError::UnsupportedPropertyType(_))
        ));
    }

    #[test]
    fn property_order_is_preserved() {
        let schema = json!({
            "type": "object",
            "properties": {
                "zebra": {"type": "string"},
                "apple": {"type": "string"},
            },
        });
        let gbnf = compile(&schema).unwrap();
        let zebra_pos = gbnf.find("zebra").unwrap();
        let apple_pos = gbnf.find("apple").unwrap();
        assert!(zebra_pos < apple_pos, "properties must stay in source order");
    }

    /// A string hand-built to satisfy the canonical rule bodies for a given
    /// schema must parse as JSON and preserve the declared key order and
    /// enum membership — the grammar is only useful if what it derives is
    /// always valid, conforming JSON.
    #[test]
    fn derivable_string_round_trips_object_shape() {
        let schema = json!({
            "type": "object",
            "properties": {
                "city": {"type": "string"},
                "mood": {"type": "string", "enum": ["happy", "sad"]},
                "temp": {"type": "number"},
                "tags": {"type": "array", "items": {"type": "string"}},
            },
        });
        compile(&schema).unwrap();

        let derived = r#"{"city": "Kyoto", "mood": "happy", "temp": -3.5, "tags": ["a", "b"]}"#;
        let parsed: Value = serde_json::from_str(derived).expect("derivable string must be valid JSON");
        let object = parsed.as_object().unwrap();
        let keys: Vec<&str> = object.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["city", "mood", "temp", "tags"]);
        assert!(["happy", "sad"].contains(&object["mood"].as_str().unwrap()));
        assert!(object["temp"].is_number());
    }

    #[test]
    fn derivable_string_round_trips_top_level_array_shape() {
        let schema = json!({"type": "array", "items": {"type": "string", "enum": ["a", "b", "c"]}});
        compile(&schema).unwrap();

        let derived = r#"["a", "c", "b"]"#;
        let parsed: Value = serde_json::from_str(derived).expect("derivable string must be valid JSON");
        let items = parsed.as_array().unwrap();
        assert!(items.iter().all(|v| ["a", "b", "c"].contains(&v.as_str().unwrap())));
    }
}
