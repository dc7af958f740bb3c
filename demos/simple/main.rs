use std::sync::Arc;

use flag_eval::{models::Flag, Entity, EvaluatorConfig, FlagStore};

pub fn main() {
    env_logger::init();

    let flag: Flag = serde_json::from_value(serde_json::json!({
        "id": 1,
        "key": "new_checkout",
        "enabled": true,
        "segments": [
            {
                "id": 1,
                "rank": 0,
                "rolloutPercent": 100,
                "constraints": [
                    {"property": "dl_state", "operator": "IN", "value": "[\"CA\", \"NY\"]"},
                    {"property": "age", "operator": "GTE", "value": "21"}
                ],
                "distributions": [
                    {"variantId": 1, "percent": 50},
                    {"variantId": 2, "percent": 50}
                ]
            }
        ],
        "variants": [
            {"id": 1, "key": "control"},
            {"id": 2, "key": "treatment", "attachment": {"button_color": "green"}}
        ]
    }))
    .unwrap();

    let store = Arc::new(FlagStore::new());
    store.publish(&[flag]).unwrap();

    let evaluator = EvaluatorConfig::new(store)
        .entity_id_attribute("entity_id")
        .to_evaluator();

    for (id, context) in [
        ("user-1", serde_json::json!({"dl_state": "CA", "age": 30})),
        ("user-2", serde_json::json!({"dl_state": "NY", "age": 25})),
        ("user-3", serde_json::json!({"dl_state": "TX", "age": 40})),
    ] {
        let entity = Entity::new(id, context);
        match evaluator.evaluate("new_checkout", &entity) {
            Ok(decision) => println!(
                "{id}: {}",
                serde_json::to_string(&decision).unwrap_or_default()
            ),
            Err(err) => println!("{id}: error: {err}"),
        }
    }

    // Explain the last decision.
    let entity = Entity::new("user-3", serde_json::json!({"dl_state": "TX", "age": 40}));
    let (_, details) = evaluator.evaluate_details("new_checkout", &entity);
    println!("{}", serde_json::to_string_pretty(&details).unwrap_or_default());
}
