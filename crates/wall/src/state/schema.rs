use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::StateError;
use super::interpolate::{Interpolate, Interpolator};

const WILDCARD: &str = "*";

/// Describes how to interpolate each part of a structured state value.
#[derive(Debug, Clone)]
pub enum Schema {
    Leaf(Interpolator),
    /// Element-wise; arrays of different length pair up to the shorter one.
    Array(Box<Schema>),
    /// Declared fields only, anything else in the payload is ignored.
    Object(BTreeMap<String, Schema>),
    /// Every key of the earlier value, all with the same schema.
    Map(Box<Schema>),
}

impl Schema {
    pub fn lerp() -> Self {
        Self::Leaf(Interpolator::NumberLerp)
    }

    pub fn nearest() -> Self {
        Self::Leaf(Interpolator::ValueNearest)
    }

    pub fn current() -> Self {
        Self::Leaf(Interpolator::CurrentValue)
    }

    pub fn custom(interpolator: impl Interpolate + 'static) -> Self {
        Self::Leaf(Interpolator::Custom(std::sync::Arc::new(interpolator)))
    }

    pub fn array(element: Schema) -> Self {
        Self::Array(Box::new(element))
    }

    pub fn map(element: Schema) -> Self {
        Self::Map(Box::new(element))
    }

    pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, Schema)>) -> Self {
        Self::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Parses the JSON shorthand: interpolator names as strings, `[elem]` for
    /// arrays, objects for fields and `{"*": elem}` for maps.
    pub fn from_json(value: &Value) -> Result<Self, StateError> {
        match value {
            Value::String(name) => Interpolator::from_name(name)
                .map(Self::Leaf)
                .ok_or_else(|| StateError::UnknownInterpolator(name.clone())),
            Value::Array(items) => match items.as_slice() {
                [element] => Ok(Self::array(Self::from_json(element)?)),
                _ => Err(StateError::InvalidSchema(format!(
                    "array schema needs exactly one element, got {}",
                    items.len()
                ))),
            },
            Value::Object(fields) => {
                if let Some(element) = fields.get(WILDCARD) {
                    if fields.len() != 1 {
                        return Err(StateError::InvalidSchema(
                            "wildcard schema cannot declare other fields".into(),
                        ));
                    }
                    return Ok(Self::map(Self::from_json(element)?));
                }
                let fields = fields
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), Self::from_json(v)?)))
                    .collect::<Result<BTreeMap<_, _>, StateError>>()?;
                Ok(Self::Object(fields))
            }
            other => Err(StateError::InvalidSchema(format!(
                "unexpected schema node {other}"
            ))),
        }
    }

    pub fn evaluate(
        &self,
        t: f64,
        at: f64,
        av: Option<&Value>,
        bt: f64,
        bv: Option<&Value>,
    ) -> Option<Value> {
        match self {
            Self::Leaf(interpolator) => interpolator.interpolate(t, at, av, bt, bv),
            Self::Array(element) => {
                let (a, b) = (av?.as_array()?, bv?.as_array()?);
                let values = a
                    .iter()
                    .zip(b)
                    .map(|(a, b)| {
                        element
                            .evaluate(t, at, Some(a), bt, Some(b))
                            .unwrap_or(Value::Null)
                    })
                    .collect();
                Some(Value::Array(values))
            }
            Self::Object(fields) => {
                let a = av?.as_object()?;
                let b = bv.and_then(Value::as_object);
                let mut out = Map::new();
                for (name, schema) in fields {
                    let field_b = b.and_then(|b| b.get(name));
                    if let Some(v) = schema.evaluate(t, at, a.get(name), bt, field_b) {
                        out.insert(name.clone(), v);
                    }
                }
                Some(Value::Object(out))
            }
            Self::Map(element) => {
                let a = av?.as_object()?;
                let b = bv.and_then(Value::as_object);
                let mut out = Map::new();
                for (key, value) in a {
                    let field_b = b.and_then(|b| b.get(key));
                    if let Some(v) = element.evaluate(t, at, Some(value), bt, field_b) {
                        out.insert(key.clone(), v);
                    }
                }
                Some(Value::Object(out))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn balls() -> Schema {
        Schema::object([(
            "balls",
            Schema::array(Schema::object([
                ("x", Schema::lerp()),
                ("y", Schema::lerp()),
                ("color", Schema::nearest()),
            ])),
        )])
    }

    #[test]
    fn nested_evaluation() {
        let a = json!({ "balls": [{ "x": 0.0, "y": 0.0, "color": "red" }] });
        let b = json!({ "balls": [{ "x": 10.0, "y": 20.0, "color": "blue" }] });

        let v = balls().evaluate(7.5, 0.0, Some(&a), 10.0, Some(&b)).unwrap();
        assert_eq!(v, json!({ "balls": [{ "x": 7.5, "y": 15.0, "color": "blue" }] }));
    }

    #[test]
    fn arrays_pair_up_to_shorter_length() {
        let schema = Schema::array(Schema::lerp());
        let (a, b) = (json!([0.0, 0.0, 0.0]), json!([2.0, 4.0]));
        let v = schema.evaluate(5.0, 0.0, Some(&a), 10.0, Some(&b)).unwrap();
        assert_eq!(v, json!([1.0, 2.0]));
    }

    #[test]
    fn undeclared_fields_are_dropped() {
        let schema = Schema::object([("x", Schema::lerp())]);
        let a = json!({ "x": 0.0, "secret": 1 });
        let b = json!({ "x": 4.0, "secret": 2 });
        let v = schema.evaluate(5.0, 0.0, Some(&a), 10.0, Some(&b)).unwrap();
        assert_eq!(v, json!({ "x": 2.0 }));
    }

    #[test]
    fn missing_leaf_is_omitted() {
        let schema = Schema::object([("x", Schema::lerp()), ("label", Schema::current())]);
        let a = json!({ "label": "hi" });
        let b = json!({ "x": 1.0 });
        let v = schema.evaluate(5.0, 0.0, Some(&a), 10.0, Some(&b)).unwrap();
        assert_eq!(v, json!({ "label": "hi" }));
    }

    #[test]
    fn wildcard_map() {
        let schema = Schema::from_json(&json!({ "*": "NumberLerp" })).unwrap();
        let a = json!({ "left": 0.0, "right": 10.0 });
        let b = json!({ "left": 10.0, "right": 0.0 });
        let v = schema.evaluate(5.0, 0.0, Some(&a), 10.0, Some(&b)).unwrap();
        assert_eq!(v, json!({ "left": 5.0, "right": 5.0 }));
    }

    #[test]
    fn from_json_shorthand() {
        let schema = Schema::from_json(&json!({
            "balls": [{ "x": "NumberLerp", "y": "NumberLerp", "color": "ValueNearest" }]
        }))
        .unwrap();
        let a = json!({ "balls": [{ "x": 0.0, "y": 0.0, "color": "red" }] });
        let b = json!({ "balls": [{ "x": 10.0, "y": 20.0, "color": "blue" }] });
        assert_eq!(
            schema.evaluate(7.5, 0.0, Some(&a), 10.0, Some(&b)),
            balls().evaluate(7.5, 0.0, Some(&a), 10.0, Some(&b))
        );

        assert!(matches!(
            Schema::from_json(&json!("Spline")),
            Err(StateError::UnknownInterpolator(_))
        ));
        assert!(Schema::from_json(&json!([])).is_err());
        assert!(Schema::from_json(&json!(3)).is_err());
    }
}
