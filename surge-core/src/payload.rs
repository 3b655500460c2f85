//! Dynamic payload synthesis
//!
//! Field specs are compiled once into [`ValueGenerator`] variants; every trial
//! then draws fresh values from a caller-supplied random source.

use crate::error::{LoadError, LoadResult};
use crate::types::{FieldKind, FieldSpec};
use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

const FIRST_NAMES: &[&str] = &["John", "Jane", "Alice", "Bob", "Charlie"];
const LAST_NAMES: &[&str] = &["Smith", "Johnson", "Williams", "Brown", "Jones"];
const EMAIL_DOMAINS: &[&str] = &["gmail.com", "yahoo.com", "hotmail.com", "example.com"];
const EMAIL_LOCAL_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

const DEFAULT_INT_RANGE: (i64, i64) = (0, 1000);
const DEFAULT_FLOAT_RANGE: (f64, f64) = (0.0, 1000.0);
const ISO_SPREAD_DAYS: i64 = 365;

/// A single field's value producer
#[derive(Debug, Clone, PartialEq)]
pub enum ValueGenerator {
    /// Uniform pick from an explicit value set
    Choice(Vec<Value>),
    Uuid,
    FullName,
    Alphanumeric { min_len: usize, max_len: usize },
    Integer { min: i64, max: i64 },
    Float { min: f64, max: f64 },
    Boolean,
    /// Random instant within `spread_days` either side of now, RFC 3339
    IsoTimestamp { spread_days: i64 },
    /// Today's date as `YYYY-MM-DD`
    CurrentDate,
    Email,
}

impl ValueGenerator {
    /// Compile a field spec. Fails with `UnsupportedFieldType` for an unknown
    /// type tag that has no explicit value set.
    pub fn compile(field: &str, spec: &FieldSpec) -> LoadResult<Self> {
        if let Some(values) = spec.values.as_ref().filter(|v| !v.is_empty()) {
            return Ok(ValueGenerator::Choice(values.clone()));
        }

        let generator = match &spec.kind {
            FieldKind::String => match spec.format.as_deref() {
                Some("uuid") => ValueGenerator::Uuid,
                Some("name") => ValueGenerator::FullName,
                _ => ValueGenerator::Alphanumeric {
                    min_len: 5,
                    max_len: 15,
                },
            },
            FieldKind::Integer => {
                let min = spec.min.map(|v| v as i64).unwrap_or(DEFAULT_INT_RANGE.0);
                let max = spec.max.map(|v| v as i64).unwrap_or(DEFAULT_INT_RANGE.1);
                check_bounds(field, min as f64, max as f64)?;
                ValueGenerator::Integer { min, max }
            }
            FieldKind::Float => {
                let min = spec.min.unwrap_or(DEFAULT_FLOAT_RANGE.0);
                let max = spec.max.unwrap_or(DEFAULT_FLOAT_RANGE.1);
                check_bounds(field, min, max)?;
                ValueGenerator::Float { min, max }
            }
            FieldKind::Boolean => ValueGenerator::Boolean,
            FieldKind::Date => match spec.format.as_deref() {
                Some("iso") => ValueGenerator::IsoTimestamp {
                    spread_days: ISO_SPREAD_DAYS,
                },
                _ => ValueGenerator::CurrentDate,
            },
            FieldKind::Email => ValueGenerator::Email,
            FieldKind::Other(tag) => {
                return Err(LoadError::UnsupportedFieldType {
                    field: field.to_string(),
                    type_tag: tag.clone(),
                })
            }
        };

        Ok(generator)
    }

    /// Produce one value
    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> Value {
        match self {
            ValueGenerator::Choice(values) => values.choose(rng).cloned().unwrap_or(Value::Null),
            ValueGenerator::Uuid => Value::String(random_uuid(rng).to_string()),
            ValueGenerator::FullName => {
                let first = FIRST_NAMES.choose(rng).copied().unwrap_or("John");
                let last = LAST_NAMES.choose(rng).copied().unwrap_or("Smith");
                Value::String(format!("{} {}", first, last))
            }
            ValueGenerator::Alphanumeric { min_len, max_len } => {
                let len = rng.gen_range(*min_len..=*max_len);
                let s: String = (0..len).map(|_| rng.sample(Alphanumeric) as char).collect();
                Value::String(s)
            }
            ValueGenerator::Integer { min, max } => Value::from(rng.gen_range(*min..=*max)),
            ValueGenerator::Float { min, max } => {
                let v = rng.gen_range(*min..=*max);
                Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
            }
            ValueGenerator::Boolean => Value::Bool(rng.gen_bool(0.5)),
            ValueGenerator::IsoTimestamp { spread_days } => {
                let spread = spread_days * 24 * 60 * 60;
                let offset = rng.gen_range(-spread..=spread);
                let ts = Utc::now() + ChronoDuration::seconds(offset);
                Value::String(ts.to_rfc3339_opts(SecondsFormat::Secs, true))
            }
            ValueGenerator::CurrentDate => Value::String(Utc::now().format("%Y-%m-%d").to_string()),
            ValueGenerator::Email => {
                let len = rng.gen_range(5..=10);
                let local: String = (0..len)
                    .map(|_| EMAIL_LOCAL_CHARS[rng.gen_range(0..EMAIL_LOCAL_CHARS.len())] as char)
                    .collect();
                let domain = EMAIL_DOMAINS.choose(rng).copied().unwrap_or("example.com");
                Value::String(format!("{}@{}", local, domain))
            }
        }
    }
}

fn check_bounds(field: &str, min: f64, max: f64) -> LoadResult<()> {
    if !min.is_finite() || !max.is_finite() {
        return Err(LoadError::invalid_config(field, "bounds must be finite numbers"));
    }
    if min > max {
        return Err(LoadError::invalid_config(
            field,
            &format!("min ({}) is greater than max ({})", min, max),
        ));
    }
    if !(max - min).is_finite() {
        return Err(LoadError::invalid_config(
            field,
            "range between min and max is too large",
        ));
    }
    Ok(())
}

/// Random v4 UUID drawn from the supplied RNG
fn random_uuid<R: Rng + ?Sized>(rng: &mut R) -> Uuid {
    let mut bytes = [0u8; 16];
    rng.fill(&mut bytes);

    // Version 4, RFC 4122 variant
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    Uuid::from_bytes(bytes)
}

/// Builds per-trial payloads from a template and compiled field generators
#[derive(Debug, Clone)]
pub struct DynamicPayloadGenerator {
    template: Option<Map<String, Value>>,
    fields: Vec<(String, ValueGenerator)>,
}

impl DynamicPayloadGenerator {
    /// Compile the field specs against a template.
    pub fn new(
        template: Option<Map<String, Value>>,
        specs: Option<&BTreeMap<String, FieldSpec>>,
    ) -> LoadResult<Self> {
        let fields = match specs {
            Some(specs) => specs
                .iter()
                .map(|(name, spec)| Ok((name.clone(), ValueGenerator::compile(name, spec)?)))
                .collect::<LoadResult<Vec<_>>>()?,
            None => Vec::new(),
        };

        Ok(Self { template, fields })
    }

    /// Number of dynamic fields
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Produce the next payload. Without a template there is nothing to fill.
    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Value> {
        let mut payload = self.template.clone()?;
        for (name, generator) in &self.fields {
            payload.insert(name.clone(), generator.generate(rng));
        }
        Some(Value::Object(payload))
    }
}

/// One-shot payload generation: copy `template` and fill each declared field.
///
/// An absent template or field-spec map returns the template unchanged.
pub fn generate_payload<R: Rng + ?Sized>(
    template: Option<&Map<String, Value>>,
    specs: Option<&BTreeMap<String, FieldSpec>>,
    rng: &mut R,
) -> LoadResult<Option<Map<String, Value>>> {
    let (template, specs) = match (template, specs) {
        (Some(t), Some(s)) => (t, s),
        (t, _) => return Ok(t.cloned()),
    };

    let mut payload = template.clone();
    for (name, spec) in specs {
        let value = generate_dynamic_value(name, spec, rng)?;
        payload.insert(name.clone(), value);
    }
    Ok(Some(payload))
}

/// Generate a single value for one field spec
pub fn generate_dynamic_value<R: Rng + ?Sized>(
    field: &str,
    spec: &FieldSpec,
    rng: &mut R,
) -> LoadResult<Value> {
    Ok(ValueGenerator::compile(field, spec)?.generate(rng))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, NaiveDate};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    fn template() -> Map<String, Value> {
        match json!({"static": "kept", "count": 1}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_explicit_values_take_precedence() {
        let mut rng = StdRng::seed_from_u64(7);
        let spec = FieldSpec::new(FieldKind::Integer)
            .with_bounds(0.0, 5.0)
            .with_values(vec![json!("a"), json!("b")]);

        for _ in 0..50 {
            let value = generate_dynamic_value("letter", &spec, &mut rng).unwrap();
            assert!(value == json!("a") || value == json!("b"));
        }
    }

    #[test]
    fn test_unknown_type_with_values_is_allowed() {
        let mut rng = StdRng::seed_from_u64(7);
        let spec = FieldSpec::new(FieldKind::Other("colour".to_string()))
            .with_values(vec![json!("red")]);
        assert_eq!(generate_dynamic_value("c", &spec, &mut rng).unwrap(), json!("red"));
    }

    #[test]
    fn test_unknown_type_without_values_fails() {
        let mut rng = StdRng::seed_from_u64(7);
        let spec = FieldSpec::new(FieldKind::Other("blob".to_string()));
        let err = generate_dynamic_value("data", &spec, &mut rng).unwrap_err();
        assert_eq!(
            err,
            LoadError::UnsupportedFieldType {
                field: "data".to_string(),
                type_tag: "blob".to_string()
            }
        );
    }

    #[test]
    fn test_integer_range() {
        let mut rng = StdRng::seed_from_u64(42);
        let spec = FieldSpec::new(FieldKind::Integer).with_bounds(10.0, 20.0);
        for _ in 0..1000 {
            let v = generate_dynamic_value("n", &spec, &mut rng).unwrap();
            let n = v.as_i64().unwrap();
            assert!((10..=20).contains(&n));
        }
    }

    #[test]
    fn test_integer_default_range() {
        let generator = ValueGenerator::compile("n", &FieldSpec::new(FieldKind::Integer)).unwrap();
        assert_eq!(generator, ValueGenerator::Integer { min: 0, max: 1000 });
    }

    #[test]
    fn test_float_range() {
        let mut rng = StdRng::seed_from_u64(42);
        let spec = FieldSpec::new(FieldKind::Float).with_bounds(1.5, 2.5);
        for _ in 0..500 {
            let v = generate_dynamic_value("f", &spec, &mut rng).unwrap();
            let f = v.as_f64().unwrap();
            assert!((1.5..=2.5).contains(&f));
        }
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let spec = FieldSpec::new(FieldKind::Integer).with_bounds(20.0, 10.0);
        assert!(matches!(
            ValueGenerator::compile("n", &spec),
            Err(LoadError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_unrepresentable_float_range_rejected() {
        let spec = FieldSpec::new(FieldKind::Float).with_bounds(-1e308, 1e308);
        assert!(matches!(
            ValueGenerator::compile("x", &spec),
            Err(LoadError::InvalidConfig { .. })
        ));

        let spec = FieldSpec::new(FieldKind::Float).with_bounds(-1e307, 1e307);
        let generator = ValueGenerator::compile("x", &spec).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let v = generator.generate(&mut rng).as_f64().unwrap();
        assert!((-1e307..=1e307).contains(&v));
    }

    #[test]
    fn test_full_integer_range_is_accepted() {
        let spec = FieldSpec::new(FieldKind::Integer).with_bounds(i64::MIN as f64, i64::MAX as f64);
        let generator = ValueGenerator::compile("n", &spec).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(generator.generate(&mut rng).is_i64());
    }

    #[test]
    fn test_string_formats() {
        let mut rng = StdRng::seed_from_u64(3);

        let uuid = generate_dynamic_value(
            "id",
            &FieldSpec::new(FieldKind::String).with_format("uuid"),
            &mut rng,
        )
        .unwrap();
        let parsed = Uuid::parse_str(uuid.as_str().unwrap()).unwrap();
        assert_eq!(parsed.get_version_num(), 4);

        let name = generate_dynamic_value(
            "name",
            &FieldSpec::new(FieldKind::String).with_format("name"),
            &mut rng,
        )
        .unwrap();
        let parts: Vec<&str> = name.as_str().unwrap().split(' ').collect();
        assert_eq!(parts.len(), 2);
        assert!(FIRST_NAMES.contains(&parts[0]));
        assert!(LAST_NAMES.contains(&parts[1]));

        for _ in 0..100 {
            let s = generate_dynamic_value("s", &FieldSpec::new(FieldKind::String), &mut rng).unwrap();
            let s = s.as_str().unwrap();
            assert!((5..=15).contains(&s.len()));
            assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn test_email_shape() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..100 {
            let v = generate_dynamic_value("e", &FieldSpec::new(FieldKind::Email), &mut rng).unwrap();
            let email = v.as_str().unwrap();
            let (local, domain) = email.split_once('@').unwrap();
            assert!((5..=10).contains(&local.len()));
            assert!(local
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
            assert!(EMAIL_DOMAINS.contains(&domain));
        }
    }

    #[test]
    fn test_dates() {
        let mut rng = StdRng::seed_from_u64(5);

        let today = generate_dynamic_value("d", &FieldSpec::new(FieldKind::Date), &mut rng).unwrap();
        assert!(NaiveDate::parse_from_str(today.as_str().unwrap(), "%Y-%m-%d").is_ok());

        let iso_spec = FieldSpec::new(FieldKind::Date).with_format("iso");
        for _ in 0..50 {
            let v = generate_dynamic_value("d", &iso_spec, &mut rng).unwrap();
            let ts = DateTime::parse_from_rfc3339(v.as_str().unwrap()).unwrap();
            let delta = (ts.with_timezone(&Utc) - Utc::now()).num_days().abs();
            assert!(delta <= 366);
        }
    }

    #[test]
    fn test_generation_is_deterministic_for_a_seed() {
        let mut specs = BTreeMap::new();
        specs.insert("id".to_string(), FieldSpec::new(FieldKind::String).with_format("uuid"));
        specs.insert("n".to_string(), FieldSpec::new(FieldKind::Integer));

        let mut rng1 = StdRng::seed_from_u64(99);
        let mut rng2 = StdRng::seed_from_u64(99);
        let a = generate_payload(Some(&template()), Some(&specs), &mut rng1).unwrap();
        let b = generate_payload(Some(&template()), Some(&specs), &mut rng2).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_absent_template_or_specs_is_noop() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut specs = BTreeMap::new();
        specs.insert("n".to_string(), FieldSpec::new(FieldKind::Integer));

        assert_eq!(generate_payload(None, Some(&specs), &mut rng).unwrap(), None);
        assert_eq!(
            generate_payload(Some(&template()), None, &mut rng).unwrap(),
            Some(template())
        );
    }

    #[test]
    fn test_payload_generator_keeps_template_fields() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut specs = BTreeMap::new();
        specs.insert("flag".to_string(), FieldSpec::new(FieldKind::Boolean));
        specs.insert("count".to_string(), FieldSpec::new(FieldKind::Integer).with_bounds(5.0, 5.0));

        let generator = DynamicPayloadGenerator::new(Some(template()), Some(&specs)).unwrap();
        assert_eq!(generator.field_count(), 2);

        let payload = generator.generate(&mut rng).unwrap();
        assert_eq!(payload["static"], json!("kept"));
        assert_eq!(payload["count"], json!(5));
        assert!(payload["flag"].is_boolean());
    }

    #[test]
    fn test_payload_generator_without_template() {
        let mut rng = StdRng::seed_from_u64(1);
        let generator = DynamicPayloadGenerator::new(None, None).unwrap();
        assert!(generator.generate(&mut rng).is_none());
    }
}
