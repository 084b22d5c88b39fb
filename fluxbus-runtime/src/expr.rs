//! Pluggable expression evaluation over messages and keys.
//!
//! The bus does not mandate an expression language. The built-in evaluator
//! understands dot-paths over structured payloads (`payload.order.id`) and
//! header lookups (`headers['partition']`); key expressions support the
//! identity form `key` with integer coercion. Richer languages plug in by
//! implementing [`ExpressionEvaluator`].

use fluxbus_core::{Message, Payload};
use serde_json::Value;

use crate::error::{Error, Result};

/// Evaluates expressions against messages and partition keys.
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluate an expression against a message, yielding a value.
    ///
    /// # Errors
    /// Returns an expression error when the expression does not apply to
    /// the message.
    fn evaluate(&self, expression: &str, message: &Message) -> Result<Value>;

    /// Evaluate a selector expression with the key in scope, coerced to an
    /// integer.
    ///
    /// # Errors
    /// Returns an expression error when the result is not an integer.
    fn evaluate_against_key(&self, expression: &str, key: &Value) -> Result<i32>;
}

/// Built-in evaluator over payload field paths and header lookups.
#[derive(Debug, Default, Clone, Copy)]
pub struct FieldPathEvaluator;

impl FieldPathEvaluator {
    fn payload_value(message: &Message) -> Result<Value> {
        match &message.payload {
            Payload::Text(text) => Ok(Value::String(text.clone())),
            Payload::Object { value, .. } => Ok(value.clone()),
            Payload::Bytes(_) => Err(Error::Expression {
                expression: "payload".to_string(),
                message: "byte payloads have no addressable fields".to_string(),
            }),
        }
    }

    fn header_key(expression: &str) -> Option<&str> {
        expression
            .strip_prefix("headers['")
            .and_then(|rest| rest.strip_suffix("']"))
            .filter(|key| !key.is_empty())
    }
}

impl ExpressionEvaluator for FieldPathEvaluator {
    fn evaluate(&self, expression: &str, message: &Message) -> Result<Value> {
        let expression = expression.trim();

        if let Some(key) = Self::header_key(expression) {
            return message.header(key).map(|v| Value::String(v.to_string())).ok_or_else(|| {
                Error::Expression {
                    expression: expression.to_string(),
                    message: format!("message has no header '{key}'"),
                }
            });
        }

        let mut path = expression.split('.');
        if path.next() != Some("payload") {
            return Err(Error::Expression {
                expression: expression.to_string(),
                message: "expected a 'payload' path or a headers[..] lookup".to_string(),
            });
        }

        let mut current = Self::payload_value(message)?;
        for segment in path {
            current = match current {
                Value::Object(mut fields) => {
                    fields.remove(segment).ok_or_else(|| Error::Expression {
                        expression: expression.to_string(),
                        message: format!("payload has no field '{segment}'"),
                    })?
                },
                other => {
                    return Err(Error::Expression {
                        expression: expression.to_string(),
                        message: format!("cannot index into {other} with '{segment}'"),
                    })
                },
            };
        }
        Ok(current)
    }

    fn evaluate_against_key(&self, expression: &str, key: &Value) -> Result<i32> {
        let expression = expression.trim();
        if expression != "key" {
            return Err(Error::Expression {
                expression: expression.to_string(),
                message: "only the identity form 'key' is supported by this evaluator".to_string(),
            });
        }
        coerce_to_i32(expression, key)
    }
}

fn coerce_to_i32(expression: &str, value: &Value) -> Result<i32> {
    let out_of_range = || Error::Expression {
        expression: expression.to_string(),
        message: format!("value {value} is not a 32-bit integer"),
    };
    match value {
        Value::Number(n) => n.as_i64().and_then(|v| i32::try_from(v).ok()).ok_or_else(out_of_range),
        Value::String(s) => s.trim().parse().map_err(|_| out_of_range()),
        _ => Err(out_of_range()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object_message(value: Value) -> Message {
        Message::new(Payload::Object { type_name: "Order".to_string(), value })
    }

    #[test]
    fn test_payload_field_path() {
        let message = object_message(json!({"order": {"id": 7}}));
        let evaluator = FieldPathEvaluator;

        assert_eq!(evaluator.evaluate("payload.order.id", &message).unwrap(), json!(7));
        assert_eq!(evaluator.evaluate("payload", &message).unwrap(), json!({"order": {"id": 7}}));
        assert!(evaluator.evaluate("payload.missing", &message).is_err());
    }

    #[test]
    fn test_header_lookup() {
        let mut message = Message::new(Payload::Text("x".to_string()));
        message.set_header("region", "emea");
        let evaluator = FieldPathEvaluator;

        assert_eq!(evaluator.evaluate("headers['region']", &message).unwrap(), json!("emea"));
        assert!(evaluator.evaluate("headers['absent']", &message).is_err());
    }

    #[test]
    fn test_text_payload_is_a_string_value() {
        let message = Message::new(Payload::Text("abc".to_string()));
        assert_eq!(FieldPathEvaluator.evaluate("payload", &message).unwrap(), json!("abc"));
    }

    #[test]
    fn test_key_coercion() {
        let evaluator = FieldPathEvaluator;
        assert_eq!(evaluator.evaluate_against_key("key", &json!(5)).unwrap(), 5);
        assert_eq!(evaluator.evaluate_against_key("key", &json!("12")).unwrap(), 12);
        assert!(evaluator.evaluate_against_key("key", &json!({"a": 1})).is_err());
        assert!(evaluator.evaluate_against_key("key.hash()", &json!(5)).is_err());
    }
}
