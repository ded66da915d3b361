use serde_json::json;

const CLASSIFY_TEMPLATE: &str = r#"
You will receive a JSON with various information about an event. Your role is to decide whether the event is a classical music event or not.

Output "true" if the event is a classical music event, otherwise output "false".

Here is the JSON:
{json}
"#;

const EXTRACT_COMPOSERS_TEMPLATE: &str = r#"
You will receive a JSON with the title and description of a classical music event. Your role is to extract the names of the composers from the description.

Output your response as a JSON list like this:
[
    "composer1",
    "composer2",
    "composer3"
]

Output full names of the composers, e.g. "Wolfgang Amadeus Mozart" or "Johann Sebastian Bach".

Here is the JSON:
{json}
"#;

const ARBITRATE_TEMPLATE: &str = r#"
You will receive a composer name and a JSON with ids and names of composers with similar names. Your role is to find the composer in the JSON and return its id.
If the composer is not in the JSON, return "{none}". Output an id only if you are absolutely sure that it is the same composer.

Composer name: {name}

JSON:
{json}
"#;

/// Classification input: title, url, venue, description.
pub fn classify_event(
    title: &str,
    url: Option<&str>,
    venue: Option<&str>,
    description: Option<&str>,
) -> String {
    let projection = json!({
        "title": title,
        "url": url,
        "venue": venue,
        "description": description,
    });
    CLASSIFY_TEMPLATE.replace("{json}", &projection.to_string())
}

pub fn extract_composers(title: &str, description: &str) -> String {
    let projection = json!({
        "title": title,
        "description": description,
    });
    EXTRACT_COMPOSERS_TEMPLATE.replace("{json}", &projection.to_string())
}

/// `candidates` is rendered as a JSON object of id -> name.
pub fn arbitrate_composer<'a>(
    name: &str,
    candidates: impl IntoIterator<Item = (&'a i64, &'a String)>,
    none_label: &str,
) -> String {
    let map: serde_json::Map<String, serde_json::Value> = candidates
        .into_iter()
        .map(|(id, name)| (id.to_string(), json!(name)))
        .collect();
    ARBITRATE_TEMPLATE
        .replace("{none}", none_label)
        .replace("{name}", name)
        .replace("{json}", &serde_json::Value::Object(map).to_string())
}
