//! Random payload expansion for target parameters
//!
//! String values of the form `$RANDOM(n)` become `n` random ASCII letters and
//! `$RANDOM_NORM(mu,sigma)` becomes a random string whose length is sampled from
//! Normal(mu, sigma) and rounded. A sampled length of zero or less leaves the
//! token untouched. Objects and arrays are expanded recursively; other values
//! pass through.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use regex::Regex;
use serde_json::Value;

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Expands `$RANDOM` tokens in a parameter tree
#[derive(Debug, Clone)]
pub struct PayloadExpander {
    uniform: Regex,
    normal: Regex,
}

impl PayloadExpander {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            uniform: Regex::new(r"\$RANDOM\(([0-9]+)\)")?,
            normal: Regex::new(r"\$RANDOM_NORM\(([0-9]+),([0-9]+)\)")?,
        })
    }

    /// Expand `value` with the thread-local RNG
    pub fn expand(&self, value: &Value) -> Value {
        self.expand_with(value, &mut rand::thread_rng())
    }

    /// Expand `value` drawing randomness from `rng`
    pub fn expand_with<R: Rng + ?Sized>(&self, value: &Value, rng: &mut R) -> Value {
        match value {
            Value::String(s) => Value::String(self.expand_string(s, rng)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.expand_with(v, rng)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.expand_with(v, rng)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn expand_string<R: Rng + ?Sized>(&self, s: &str, rng: &mut R) -> String {
        let mut length: i64 = 0;

        if let Some(caps) = self.normal.captures(s) {
            let mu = caps[1].parse::<f64>().unwrap_or(0.0);
            let sigma = caps[2].parse::<f64>().unwrap_or(0.0);
            if let Ok(normal) = Normal::new(mu, sigma) {
                length = normal.sample(rng).round() as i64;
            }
        }

        // `$RANDOM(n)` wins when both tokens are present
        if let Some(caps) = self.uniform.captures(s) {
            length = caps[1].parse::<i64>().unwrap_or(0);
        }

        if length > 0 {
            random_letters(length as usize, rng)
        } else {
            s.to_string()
        }
    }
}

fn random_letters<R: Rng + ?Sized>(len: usize, rng: &mut R) -> String {
    (0..len)
        .map(|_| LETTERS[rng.gen_range(0..LETTERS.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    fn expander() -> PayloadExpander {
        PayloadExpander::new().unwrap()
    }

    #[test]
    fn test_random_has_exact_length() {
        let expander = expander();
        for _ in 0..20 {
            let out = expander.expand(&json!("$RANDOM(10)"));
            let s = out.as_str().unwrap();
            assert_eq!(s.len(), 10);
            assert_ne!(s, "$RANDOM(10)");
            assert!(s.chars().all(|c| c.is_ascii_alphabetic()));
        }
    }

    #[test]
    fn test_random_differs_between_expansions() {
        let expander = expander();
        let a = expander.expand(&json!("$RANDOM(32)"));
        let b = expander.expand(&json!("$RANDOM(32)"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_random_norm_samples_length() {
        let expander = expander();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let out = expander.expand_with(&json!("$RANDOM_NORM(80,10)"), &mut rng);
            let len = out.as_str().unwrap().len();
            assert!(len > 20 && len < 140, "len {len}");
        }
    }

    #[test]
    fn test_zero_length_leaves_token() {
        let expander = expander();
        assert_eq!(expander.expand(&json!("$RANDOM(0)")), json!("$RANDOM(0)"));
        assert_eq!(
            expander.expand(&json!("$RANDOM_NORM(0,0)")),
            json!("$RANDOM_NORM(0,0)")
        );
    }

    #[test]
    fn test_plain_values_pass_through() {
        let expander = expander();
        let value = json!({"name": "plain", "count": 3, "flag": true, "none": null});
        assert_eq!(expander.expand(&value), value);
    }

    #[test]
    fn test_nested_objects_and_arrays_are_expanded() {
        let expander = expander();
        let value = json!({
            "outer": {"payload": "$RANDOM(5)"},
            "list": ["$RANDOM(3)", 1],
            "keep": "value"
        });

        let out = expander.expand(&value);

        assert_eq!(out["outer"]["payload"].as_str().unwrap().len(), 5);
        assert_eq!(out["list"][0].as_str().unwrap().len(), 3);
        assert_eq!(out["list"][1], json!(1));
        assert_eq!(out["keep"], json!("value"));
    }
}
