//! Cache Name Generation
//!
//! Sites that declare no name get one derived from the intercepted method:
//! `Type.method(ParamA,ParamB)`, with configured package prefixes stripped.

use dashmap::DashMap;

use crate::config::MethodSignature;

/// Derives a cache name from a method signature
pub trait CacheNameGenerator: Send + Sync {
    fn generate_cache_name(&self, method: &MethodSignature) -> String;
}

/// Default generator; results are memoized per signature
pub struct DefaultCacheNameGenerator {
    hidden_packages: Vec<String>,
    memo: DashMap<MethodSignature, String>,
}

impl DefaultCacheNameGenerator {
    /// Create a generator stripping the given package prefixes
    pub fn new(hidden_packages: &[String]) -> Self {
        let mut hidden_packages: Vec<String> = hidden_packages
            .iter()
            .filter(|p| !p.is_empty())
            .cloned()
            .collect();
        // Longest first so nested packages win over their parents
        hidden_packages.sort_by(|a, b| b.len().cmp(&a.len()));
        Self {
            hidden_packages,
            memo: DashMap::new(),
        }
    }

    fn strip(&self, type_name: &str) -> String {
        for package in &self.hidden_packages {
            if let Some(rest) = type_name.strip_prefix(package.as_str()) {
                if let Some(rest) = rest.strip_prefix('.') {
                    return rest.to_string();
                }
            }
        }
        type_name.to_string()
    }
}

impl CacheNameGenerator for DefaultCacheNameGenerator {
    fn generate_cache_name(&self, method: &MethodSignature) -> String {
        if let Some(name) = self.memo.get(method) {
            return name.clone();
        }

        let params: Vec<String> = method.param_types.iter().map(|p| self.strip(p)).collect();
        let name = format!(
            "{}.{}({})",
            self.strip(&method.declaring_type),
            method.method,
            params.join(",")
        );
        self.memo.insert(method.clone(), name.clone());
        name
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_name() {
        let generator = DefaultCacheNameGenerator::new(&[]);
        let method = MethodSignature::new("com.example.UserService", "find", ["long"]);
        assert_eq!(
            generator.generate_cache_name(&method),
            "com.example.UserService.find(long)"
        );
    }

    #[test]
    fn test_hidden_packages_stripped() {
        let generator = DefaultCacheNameGenerator::new(&[
            "com.example".to_string(),
            "com.example.model".to_string(),
        ]);
        let method = MethodSignature::new(
            "com.example.UserService",
            "save",
            ["com.example.model.User", "java.lang.String"],
        );
        assert_eq!(
            generator.generate_cache_name(&method),
            "UserService.save(User,java.lang.String)"
        );
    }

    #[test]
    fn test_prefix_must_end_at_package_boundary() {
        let generator = DefaultCacheNameGenerator::new(&["com.ex".to_string()]);
        let method = MethodSignature::new("com.example.UserService", "find", Vec::<String>::new());
        assert_eq!(
            generator.generate_cache_name(&method),
            "com.example.UserService.find()"
        );
    }

    #[test]
    fn test_memoized() {
        let generator = DefaultCacheNameGenerator::new(&[]);
        let method = MethodSignature::new("A", "b", Vec::<String>::new());
        let first = generator.generate_cache_name(&method);
        let second = generator.generate_cache_name(&method);
        assert_eq!(first, second);
        assert_eq!(generator.memo.len(), 1);
    }
}
