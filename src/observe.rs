//! Runtime statistics for long-lived components

/// A component that can report its live counters
pub trait Observable {
    /// Short component name used as the key in combined stats output
    fn component(&self) -> &'static str;

    /// Current counters as a JSON object
    fn stats(&self) -> serde_json::Value;
}

/// Combine several components' stats into one JSON object
pub fn collect(components: &[&dyn Observable]) -> serde_json::Value {
    let map = components
        .iter()
        .map(|c| (c.component().to_string(), c.stats()))
        .collect::<serde_json::Map<_, _>>();
    serde_json::Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixed(&'static str, u64);

    impl Observable for Fixed {
        fn component(&self) -> &'static str {
            self.0
        }

        fn stats(&self) -> serde_json::Value {
            json!({ "count": self.1 })
        }
    }

    #[test]
    fn collect_keys_by_component() {
        let a = Fixed("cache", 3);
        let b = Fixed("budget", 1);
        let stats = collect(&[&a, &b]);
        assert_eq!(stats["cache"]["count"], 3);
        assert_eq!(stats["budget"]["count"], 1);
    }
}
