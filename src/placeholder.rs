//! Placeholder substitution for path and command templates
//!
//! Templates such as `tests/test_{fileName}` are expanded in a single
//! left-to-right pass. Inserted values are never scanned again, so a value
//! that happens to contain a token string stays literal.

use crate::context::PathContext;

pub const RELATIVE_FILE_PATH: &str = "{relativeFilePath}";
pub const FILE_NAME: &str = "{fileName}";
pub const SOURCE_DIR: &str = "{sourceDir}";
pub const TEST_FILE_PATH: &str = "{testFilePath}";

/// Values available for substitution. A token without a value is left as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaceholderValues {
    pub relative_file_path: Option<String>,
    pub file_name: Option<String>,
    pub source_dir: Option<String>,
    pub test_file_path: Option<String>,
}

impl PlaceholderValues {
    /// Values for the source/test path templates.
    pub fn for_paths(ctx: &PathContext) -> Self {
        Self {
            relative_file_path: Some(ctx.relative_file_path.clone()),
            file_name: Some(ctx.file_name.clone()),
            source_dir: Some(ctx.source_dir.clone()),
            test_file_path: None,
        }
    }

    /// Values for the test command template, once the test path is known.
    pub fn for_command(ctx: &PathContext, test_file_path: &str) -> Self {
        Self {
            test_file_path: Some(test_file_path.to_string()),
            ..Self::for_paths(ctx)
        }
    }

    fn lookup(&self, rest: &str) -> Option<(&'static str, &str)> {
        let table = [
            (RELATIVE_FILE_PATH, &self.relative_file_path),
            (FILE_NAME, &self.file_name),
            (SOURCE_DIR, &self.source_dir),
            (TEST_FILE_PATH, &self.test_file_path),
        ];
        table.into_iter().find_map(|(token, value)| match value {
            Some(value) if rest.starts_with(token) => Some((token, value.as_str())),
            _ => None,
        })
    }
}

/// Replace every occurrence of every known token in `template`.
pub fn resolve(template: &str, values: &PlaceholderValues) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        rest = &rest[open..];
        match values.lookup(rest) {
            Some((token, value)) => {
                out.push_str(value);
                rest = &rest[token.len()..];
            }
            None => {
                out.push('{');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn values(file_name: &str) -> PlaceholderValues {
        PlaceholderValues {
            relative_file_path: Some(format!("app/{}", file_name)),
            file_name: Some(file_name.to_string()),
            source_dir: Some("app".to_string()),
            test_file_path: Some(format!("tests/test_{}", file_name)),
        }
    }

    #[test]
    fn test_resolve_single_token() {
        assert_eq!(resolve("{fileName}", &values("x.py")), "x.py");
        assert_eq!(
            resolve("tests/test_{fileName}", &values("foo.py")),
            "tests/test_foo.py"
        );
    }

    #[test]
    fn test_resolve_replaces_every_occurrence() {
        let out = resolve("{sourceDir}/{fileName}:{sourceDir}", &values("m.py"));
        assert_eq!(out, "app/m.py:app");
    }

    #[test]
    fn test_resolve_leaves_unknown_tokens() {
        let out = resolve("{unknown}/{fileName}/{", &values("m.py"));
        assert_eq!(out, "{unknown}/m.py/{");
    }

    #[test]
    fn test_resolve_leaves_tokens_without_value() {
        let vals = PlaceholderValues {
            file_name: Some("a.py".to_string()),
            ..Default::default()
        };
        assert_eq!(resolve("{testFilePath} {fileName}", &vals), "{testFilePath} a.py");
    }

    #[test]
    fn test_resolve_does_not_reexpand_values() {
        let vals = PlaceholderValues {
            file_name: Some("{sourceDir}".to_string()),
            source_dir: Some("pkg".to_string()),
            ..Default::default()
        };
        assert_eq!(resolve("{fileName}-{sourceDir}", &vals), "{sourceDir}-pkg");
    }

    #[test]
    fn test_resolve_order_independent() {
        // Same tokens in different orders resolve to the same substitutions.
        let vals = values("calc.py");
        let a = resolve("{fileName}|{sourceDir}|{testFilePath}", &vals);
        let b = resolve("{testFilePath}|{sourceDir}|{fileName}", &vals);
        let split_a: Vec<&str> = a.split('|').collect();
        let mut split_b: Vec<&str> = b.split('|').collect();
        split_b.reverse();
        assert_eq!(split_a, split_b);
    }

    #[test]
    fn test_default_command_template() {
        let out = resolve(
            crate::config::DEFAULT_TEST_COMMAND,
            &PlaceholderValues {
                source_dir: Some("app".to_string()),
                test_file_path: Some("tests/test_calc.py".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(
            out,
            "pytest tests/test_calc.py --cov=app --cov-branch --cov-report=xml --cov-report=html"
        );
    }

    proptest! {
        // Idempotent whenever no substituted value contains a brace.
        #[test]
        fn prop_resolve_idempotent(
            template in "[a-z/_{}.]{0,24}(\\{fileName\\}|\\{sourceDir\\}|\\{testFilePath\\})?[a-z/_.]{0,8}",
            name in "[a-z_]{1,8}\\.py",
            dir in "[a-z/]{0,12}",
        ) {
            let vals = PlaceholderValues {
                relative_file_path: Some(format!("{}/{}", dir, name)),
                file_name: Some(name.clone()),
                source_dir: Some(dir.clone()),
                test_file_path: Some(format!("tests/test_{}", name)),
            };
            let once = resolve(&template, &vals);
            prop_assert_eq!(resolve(&once, &vals), once);
        }
    }
}
