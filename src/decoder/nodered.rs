use super::half::HALF_TO_FLOAT_JS;
use super::{DecoderEmitter, DecoderPlan, TimeDerivation, TIME_FIELD};
use crate::model::{FieldSpec, FieldType};
use serde_json::Value;
use std::fmt::Write;

const PAYLOAD_BUFFER: &str = "msg.payload_raw";
const NANOS_PER_MILLI: i64 = 1_000_000;

/// Emits the body of a Node-RED `function` node.
///
/// The script reads the little-endian uplink buffer, fills a field map in
/// declaration order and replaces `msg.payload` with `[fields, tags]`, the
/// shape the `influxdb out` node expects for a point with tags.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeRedFunctionEmitter;

impl DecoderEmitter for NodeRedFunctionEmitter {
    fn emit(&self, plan: &DecoderPlan<'_>) -> String {
        let mut out = String::new();
        out.push_str(HALF_TO_FLOAT_JS);
        out.push('\n');
        let _ = writeln!(out, "var buf = {PAYLOAD_BUFFER};");
        out.push_str("var fields = {};\n");

        for field in &plan.fields {
            match read_expression(field) {
                Some(expr) => {
                    let _ = writeln!(out, "fields[{}] = {};", js_string(&field.name), expr);
                }
                None => tracing::warn!(
                    field = %field.name,
                    kind = %field.kind,
                    length = field.length_bytes,
                    "no read available for field length; field skipped"
                ),
            }
        }

        if let Some(statement) = time_statement(&plan.time) {
            out.push_str(&statement);
            out.push('\n');
        }

        let tags = Value::Object(plan.tags.clone());
        let _ = writeln!(out, "msg.payload = [fields, {tags}];");
        out.push_str("return msg;\n");
        out
    }
}

fn read_expression(field: &FieldSpec) -> Option<String> {
    let offset = field.offset_bytes;
    let length = field.length_bytes;
    let end = field.end();
    let expr = match (&field.kind, length) {
        (FieldType::Int, 1) => format!("buf.readInt8({offset})"),
        (FieldType::Int, 2 | 4) => format!("buf.readInt{}LE({offset})", 8 * length),
        (FieldType::Int, 8) => format!("Number(buf.readBigInt64LE({offset}))"),
        (FieldType::Int, 3 | 5 | 6) => format!("buf.readIntLE({offset}, {length})"),
        (FieldType::Uint, 1) => format!("buf.readUInt8({offset})"),
        (FieldType::Uint, 2 | 4) => format!("buf.readUInt{}LE({offset})", 8 * length),
        (FieldType::Uint, 8) => format!("Number(buf.readBigUInt64LE({offset}))"),
        (FieldType::Uint, 3 | 5 | 6) => format!("buf.readUIntLE({offset}, {length})"),
        (FieldType::Int | FieldType::Uint, _) => return None,
        (FieldType::Float, 2) => format!("halfToFloat(buf.slice({offset}, {end}))"),
        (FieldType::Float, 4) => format!("buf.readFloatLE({offset})"),
        (FieldType::Float, _) => format!("buf.readDoubleLE({offset})"),
        (FieldType::StringAscii, _) => format!("buf.toString(\"ascii\", {offset}, {end})"),
        (FieldType::StringUnicode, _) => format!("buf.toString(\"utf-8\", {offset}, {end})"),
        (FieldType::Unknown(_), _) => return None,
    };
    Some(expr)
}

fn time_statement(time: &TimeDerivation) -> Option<String> {
    let target = js_string(TIME_FIELD);
    match time {
        TimeDerivation::Network => Some(format!(
            "fields[{target}] = new Date().getTime() * {NANOS_PER_MILLI};"
        )),
        TimeDerivation::Device { field, format } => {
            let source = format!("fields[{}]", js_string(field.as_deref()?));
            let expr = match format.nanos_per_unit() {
                Some(1) => source,
                Some(factor) => format!("{source} * {factor}"),
                None => format!("Date.parse({source}) * {NANOS_PER_MILLI}"),
            };
            Some(format!("fields[{target}] = {expr};"))
        }
    }
}

/// Double-quoted script literal; JSON string syntax is valid JavaScript.
fn js_string(raw: &str) -> String {
    Value::String(raw.to_string()).to_string()
}
