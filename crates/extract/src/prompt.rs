use crate::schema::ObjectKind;

pub fn build_entity_prompt(chunk_text: &str) -> String {
    format!(
        r#"Extract the entities mentioned in the following text.

INSTRUCTIONS:
1. Identify key entities (people, organizations, concepts, technologies, locations, events)
2. Describe each entity using only what the text says about it
3. Output ONLY valid JSON, nothing else
4. Use the exact schema below

SCHEMA:
{{
  "entities": [
    {{"name": "EntityName", "type": "person|organization|concept|technology|location|event", "desc": "what the text says about the entity"}}
  ]
}}

RULES:
- Use the entity name exactly as it appears in the text
- One object per distinct entity
- Output ONLY the JSON object, no markdown, no explanations

TEXT:
{}

JSON OUTPUT:"#,
        chunk_text
    )
}

/// `entities` are the `(name, type)` pairs already resolved for this chunk.
pub fn build_relation_prompt(chunk_text: &str, entities: &[(String, String)]) -> String {
    let entity_list = entities
        .iter()
        .map(|(name, entity_type)| format!("- {} ({})", name, entity_type))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Extract the relationships between the listed entities from the following text.

INSTRUCTIONS:
1. Only connect entities from the ENTITIES list
2. Use the entity names exactly as listed for "source" and "target"
3. Output ONLY valid JSON, nothing else
4. Use the exact schema below

SCHEMA:
{{
  "relations": [
    {{"source": "SourceName", "target": "TargetName", "name": "relationship_type", "desc": "how the text relates them"}}
  ]
}}

RULES:
- Relation names should be short verb phrases: "founded", "located in", "uses", etc.
- Output ONLY the JSON object, no markdown, no explanations

ENTITIES:
{}

TEXT:
{}

JSON OUTPUT:"#,
        entity_list, chunk_text
    )
}

pub fn build_continue_prompt(kind: ObjectKind) -> String {
    format!(
        r#"Some {kind} were missed in the last extraction. Add them using the same schema.
Output ONLY a JSON object of the form {{"{kind}": [...]}} containing the additional {kind}."#,
        kind = kind.key()
    )
}

pub fn build_loop_prompt(kind: ObjectKind) -> String {
    format!(
        r#"Are there still {kind} in the text that have not been extracted? Answer only "yes" or "no"."#,
        kind = kind.key()
    )
}

pub fn build_summary_prompt(name: &str, desc: &str) -> String {
    format!(
        r#"The following descriptions all refer to "{}". Merge them into one concise description.
Keep every distinct fact, drop repetition, do NOT use markdown formatting.

DESCRIPTIONS:
{}

SUMMARY:"#,
        name, desc
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_prompt_lists_entities() {
        let prompt = build_relation_prompt(
            "Paris is the capital of France.",
            &[
                ("Paris".to_string(), "location".to_string()),
                ("France".to_string(), "location".to_string()),
            ],
        );

        assert!(prompt.contains("- Paris (location)"));
        assert!(prompt.contains("- France (location)"));
        assert!(prompt.contains("\"relations\""));
    }

    #[test]
    fn test_entity_prompt_only_asks_for_entities() {
        let prompt = build_entity_prompt("text");
        assert!(prompt.contains("\"entities\""));
        assert!(!prompt.contains("\"relations\""));
    }

    #[test]
    fn test_continue_prompt_names_the_array() {
        assert!(build_continue_prompt(ObjectKind::Relations).contains(r#"{"relations": [...]}"#));
    }
}
