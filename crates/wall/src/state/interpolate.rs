use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// Blends two timestamped values for a render time `t`. Either side may be
/// missing, in which case most interpolators give up and return `None`.
pub trait Interpolate: Send + Sync {
    fn interpolate(
        &self,
        t: f64,
        at: f64,
        av: Option<&Value>,
        bt: f64,
        bv: Option<&Value>,
    ) -> Option<Value>;
}

#[derive(Clone)]
pub enum Interpolator {
    NumberLerp,
    ValueNearest,
    CurrentValue,
    Custom(Arc<dyn Interpolate>),
}

impl fmt::Debug for Interpolator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Interpolator {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "NumberLerp" => Some(Self::NumberLerp),
            "ValueNearest" => Some(Self::ValueNearest),
            "CurrentValue" => Some(Self::CurrentValue),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::NumberLerp => "NumberLerp",
            Self::ValueNearest => "ValueNearest",
            Self::CurrentValue => "CurrentValue",
            Self::Custom(_) => "Custom",
        }
    }

    pub fn interpolate(
        &self,
        t: f64,
        at: f64,
        av: Option<&Value>,
        bt: f64,
        bv: Option<&Value>,
    ) -> Option<Value> {
        match self {
            Self::NumberLerp => {
                let (a, b) = (av?.as_f64()?, bv?.as_f64()?);
                if at == bt {
                    return bv.cloned();
                }
                Some(Value::from(lerp(t, at, a, bt, b)))
            }
            // ties go to the earlier snapshot
            Self::ValueNearest => {
                if (t - at).abs() <= (t - bt).abs() {
                    av.cloned()
                } else {
                    bv.cloned()
                }
            }
            Self::CurrentValue => av.cloned(),
            Self::Custom(custom) => custom.interpolate(t, at, av, bt, bv),
        }
    }
}

pub fn lerp(t: f64, at: f64, a: f64, bt: f64, b: f64) -> f64 {
    let alpha = (t - at) / (bt - at);
    a + (b - a) * alpha
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn number_lerp() {
        let (a, b) = (json!(0.0), json!(10.0));
        let v = Interpolator::NumberLerp.interpolate(2.5, 0.0, Some(&a), 10.0, Some(&b));
        assert_eq!(v, Some(json!(2.5)));
    }

    #[test]
    fn number_lerp_degenerate_interval_returns_b() {
        let (a, b) = (json!(1), json!(7));
        let v = Interpolator::NumberLerp.interpolate(3.0, 5.0, Some(&a), 5.0, Some(&b));
        assert_eq!(v, Some(json!(7)));
    }

    #[test]
    fn number_lerp_rejects_non_numbers() {
        let (a, b) = (json!("red"), json!(1.0));
        let lerp = Interpolator::NumberLerp;
        assert_eq!(lerp.interpolate(0.5, 0.0, Some(&a), 1.0, Some(&b)), None);
        assert_eq!(lerp.interpolate(0.5, 0.0, None, 1.0, Some(&b)), None);
    }

    #[test]
    fn nearest_prefers_earlier_on_tie() {
        let (a, b) = (json!("a"), json!("b"));
        let nearest = Interpolator::ValueNearest;
        assert_eq!(nearest.interpolate(5.0, 0.0, Some(&a), 10.0, Some(&b)), Some(a.clone()));
        assert_eq!(nearest.interpolate(6.0, 0.0, Some(&a), 10.0, Some(&b)), Some(b));
    }

    #[test]
    fn current_value_holds_a() {
        let (a, b) = (json!({ "x": 1 }), json!({ "x": 2 }));
        let v = Interpolator::CurrentValue.interpolate(9.9, 0.0, Some(&a), 10.0, Some(&b));
        assert_eq!(v, Some(a));
    }

    #[test]
    fn names_round_trip() {
        for name in ["NumberLerp", "ValueNearest", "CurrentValue"] {
            assert_eq!(Interpolator::from_name(name).map(|i| i.name()), Some(name));
        }
        assert!(Interpolator::from_name("Cubic").is_none());
    }
}
