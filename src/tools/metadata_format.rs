//! 远端元数据 / 查询响应 → 模型可读文本
//!
//! 响应结构缺字段时按默认值处理；结构完全对不上时退回原始 JSON，不报错。

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::ToolError;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TypesPayload {
    types: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ClassItem {
    id: String,
    name: String,
    title: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ClassListPayload {
    #[serde(rename = "type")]
    metadata_type: String,
    classes: Vec<ClassItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TypeName {
    #[serde(rename = "type")]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TypesDescription {
    types: Vec<TypeName>,
    enums: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PropertyDescription {
    name: String,
    title: String,
    types_description: TypesDescription,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PropertyWrapper {
    property: PropertyDescription,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TableDescription {
    name: String,
    title: String,
    properties: Vec<PropertyWrapper>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TableWrapper {
    table: TableDescription,
}

/// 引用类（目录、文档）有 properties / tables；寄存器有 dimensions / resources / attributes
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ClassPayload {
    name: String,
    title: String,
    is_ref: bool,
    properties: Vec<PropertyWrapper>,
    tables: Vec<TableWrapper>,
    dimensions: Vec<PropertyWrapper>,
    resources: Vec<PropertyWrapper>,
    attributes: Vec<PropertyWrapper>,
}

fn response_as<T: DeserializeOwned>(body: &Value) -> Option<T> {
    body.get("response")
        .and_then(|r| serde_json::from_value(r.clone()).ok())
}

fn raw(body: &Value) -> String {
    serde_json::to_string_pretty(body).unwrap_or_else(|_| body.to_string())
}

pub fn format_types(body: &Value) -> String {
    let Some(payload) = response_as::<TypesPayload>(body) else {
        return raw(body);
    };
    let types: Vec<&String> = payload.types.iter().filter(|t| !t.is_empty()).collect();
    if types.is_empty() {
        return "The catalog is empty".to_string();
    }
    let mut out = String::from("# Metadata types\n");
    for t in types {
        out.push_str(&format!(" - {}\n", t));
    }
    out
}

pub fn format_class_list(body: &Value) -> String {
    let Some(payload) = response_as::<ClassListPayload>(body) else {
        return raw(body);
    };
    if payload.classes.is_empty() {
        return format!("The catalog of type {} is empty", payload.metadata_type);
    }
    let mut out = format!("# Metadata catalog\n## Type: {}\n", payload.metadata_type);
    for item in &payload.classes {
        out.push_str(&format!(
            "- **{}**\n  ID: {} | SysName: {}\n",
            display_title(&item.title, &item.name),
            item.id,
            item.name
        ));
    }
    out.push_str(
        "\nMatch the user's wording against the titles first, then the system names. \
         If nothing matches, try the next metadata type.\n",
    );
    out
}

pub fn format_class_metadata(body: &Value) -> String {
    let Some(payload) = response_as::<ClassPayload>(body) else {
        return raw(body);
    };
    let mut out = format!(
        "# Class {} ({})\n",
        payload.name,
        display_title(&payload.title, &payload.name)
    );
    if payload.is_ref {
        append_section(&mut out, "Fields", &payload.properties);
        for wrapper in &payload.tables {
            let table = &wrapper.table;
            out.push_str(&format!(
                "\n## Tabular section {} ({})\n",
                table.name,
                display_title(&table.title, &table.name)
            ));
            append_properties(&mut out, &table.properties);
        }
    } else {
        append_section(&mut out, "Dimensions", &payload.dimensions);
        append_section(&mut out, "Resources", &payload.resources);
        append_section(&mut out, "Attributes", &payload.attributes);
    }
    out
}

fn append_section(out: &mut String, title: &str, items: &[PropertyWrapper]) {
    if items.is_empty() {
        return;
    }
    out.push_str(&format!("\n## {}\n", title));
    append_properties(out, items);
}

fn append_properties(out: &mut String, items: &[PropertyWrapper]) {
    for (index, wrapper) in items.iter().enumerate() {
        let prop = &wrapper.property;
        let types: Vec<&str> = prop
            .types_description
            .types
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        out.push_str(&format!(
            "{}. **{}** ID: `{}` | Types: [{}]",
            index + 1,
            display_title(&prop.title, &prop.name),
            prop.name,
            types.join(", ")
        ));
        if !prop.types_description.enums.is_empty() {
            out.push_str(&format!(
                " | Values: [{}]",
                prop.types_description.enums.join(", ")
            ));
        }
        out.push('\n');
    }
}

fn display_title<'a>(title: &'a str, name: &'a str) -> &'a str {
    if title.trim().is_empty() {
        name
    } else {
        title
    }
}

/// 取 response 字段：字符串原样返回，其它 JSON 序列化后返回
pub fn text_of_response(body: &Value) -> String {
    match body.get("response") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => raw(other),
        None => raw(body),
    }
}

/// 汇总查询结果：记录数、字段名、前 sample_rows 行。
/// 没有 response 数组视为服务端错误，取 error / message 字段作为原因。
pub fn format_query_result(
    body: &Value,
    query: &str,
    sample_rows: usize,
) -> Result<String, ToolError> {
    let Some(rows) = body.get("response").and_then(Value::as_array) else {
        let reason = body
            .get("error")
            .or_else(|| body.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("unknown server error");
        return Err(ToolError::Failed(format!(
            "query was rejected by the server: {}",
            reason
        )));
    };

    let sample: Vec<&Value> = rows.iter().take(sample_rows).collect();
    let fields: Vec<String> = sample
        .first()
        .and_then(|row| row.as_object())
        .map(|obj| obj.keys().cloned().collect())
        .unwrap_or_default();

    let mut summary = json!({
        "status": "success",
        "query": query,
        "total_records": rows.len(),
        "fields": fields,
        "sample_data": sample,
    });
    if rows.len() > 100 {
        summary["note"] = json!("Large result set, consider filters or aggregation");
    }
    Ok(raw(&summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_types() {
        let body = json!({"response": {"types": ["Справочники", "", "Документы"]}});
        let text = format_types(&body);
        assert!(text.contains(" - Справочники"));
        assert!(text.contains(" - Документы"));
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn test_format_class_list_falls_back_to_name() {
        let body = json!({"response": {"type": "Справочники", "classes": [
            {"id": "1", "name": "Ресурсы", "title": ""},
            {"id": "2", "name": "ОбъектыОбслуживания", "title": "Объекты обслуживания"}
        ]}});
        let text = format_class_list(&body);
        assert!(text.contains("## Type: Справочники"));
        assert!(text.contains("- **Ресурсы**"));
        assert!(text.contains("- **Объекты обслуживания**"));
    }

    #[test]
    fn test_format_register_metadata() {
        let body = json!({"response": {
            "name": "Цены", "title": "Цены", "is_ref": false,
            "dimensions": [{"property": {"name": "Номенклатура", "title": "", "types_description": {"types": [{"type": "СправочникСсылка.Номенклатура"}], "enums": []}}}],
            "resources": [{"property": {"name": "Цена", "title": "Цена", "types_description": {"types": [{"type": "Число"}], "enums": []}}}]
        }});
        let text = format_class_metadata(&body);
        assert!(text.contains("## Dimensions"));
        assert!(text.contains("СправочникСсылка.Номенклатура"));
        assert!(text.contains("## Resources"));
        assert!(!text.contains("## Attributes"));
    }

    #[test]
    fn test_query_result_summary() {
        let body = json!({"response": [
            {"Наименование": "A", "Код": 1},
            {"Наименование": "B", "Код": 2},
            {"Наименование": "C", "Код": 3},
            {"Наименование": "D", "Код": 4}
        ]});
        let text = format_query_result(&body, "ВЫБРАТЬ ...", 3).unwrap();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["total_records"], 4);
        assert_eq!(parsed["sample_data"].as_array().unwrap().len(), 3);
        assert_eq!(parsed["fields"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_query_without_response_array_is_server_error() {
        let body = json!({"error": "Таблица не найдена"});
        let err = format_query_result(&body, "ВЫБРАТЬ", 3).unwrap_err();
        assert!(err.to_string().contains("Таблица не найдена"));
    }

    #[test]
    fn test_text_of_response() {
        assert_eq!(text_of_response(&json!({"response": "help"})), "help");
        assert!(text_of_response(&json!({"other": 1})).contains("other"));
    }
}
