//! 工具参数 JSON Schema 生成（schemars）
//!
//! 每个工具的参数结构体派生 JsonSchema，这里把它转成发给模型的 `parameters` 对象。

use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde_json::Value;

/// 生成参数结构体的 JSON Schema（内联子 schema，去掉 $schema / title 等模型不需要的字段）
pub fn parameters_schema_for<T: JsonSchema>() -> Value {
    let settings = SchemaSettings::draft07().with(|s| {
        s.inline_subschemas = true;
        s.meta_schema = None;
    });
    let schema = settings.into_generator().into_root_schema_for::<T>();
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| empty_object_schema());
    if let Some(obj) = value.as_object_mut() {
        obj.remove("title");
        obj.remove("definitions");
        obj.entry("properties")
            .or_insert_with(|| Value::Object(Default::default()));
    }
    value
}

pub fn empty_object_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {},
        "required": []
    })
}
