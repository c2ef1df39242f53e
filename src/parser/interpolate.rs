//! `${...}` variable interpolation
//!
//! Pre-parse textual substitution over raw YAML. The grammar is
//! `${name}`, `${service.name}`, and `${component.output}`:
//!
//! - `${name}` resolves from the active scopes: the containing service's
//!   variables, then `--var` overrides, then stack variables. Unresolved
//!   plain names are errors.
//! - `${a.b}` resolves eagerly when `a` names a sibling service with a
//!   variable `b`; otherwise it is a lazy component-output reference and is
//!   left intact for the reconciler, which substitutes real outputs as
//!   stages complete.
//!
//! Substitution is textual but bounded: values are scalar strings, there is
//! no expression evaluation or recursion, and each value is visited at most
//! once per pass.

use std::collections::BTreeMap;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use super::ParseError;

static VAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z0-9_-]+(?:\.[A-Za-z0-9_-]+)?)\}").expect("valid regex"));

/// Variable resolution scopes for one interpolation pass
#[derive(Debug)]
pub struct VarScope<'a> {
    /// Stack variables merged with `--var` overrides (overrides win)
    stack_vars: &'a BTreeMap<String, String>,
    /// Variables of the containing service; shadow everything
    service_vars: &'a BTreeMap<String, String>,
    /// All services' variables, for `${service.name}` lookups
    cross_service: &'a BTreeMap<String, BTreeMap<String, String>>,
}

impl<'a> VarScope<'a> {
    pub fn new(
        stack_vars: &'a BTreeMap<String, String>,
        service_vars: &'a BTreeMap<String, String>,
        cross_service: &'a BTreeMap<String, BTreeMap<String, String>>,
    ) -> Self {
        Self {
            stack_vars,
            service_vars,
            cross_service,
        }
    }

    fn resolve_plain(&self, name: &str) -> Option<&str> {
        self.service_vars
            .get(name)
            .or_else(|| self.stack_vars.get(name))
            .map(String::as_str)
    }

    fn resolve_dotted(&self, scope: &str, name: &str) -> Option<&str> {
        self.cross_service
            .get(scope)
            .and_then(|vars| vars.get(name))
            .map(String::as_str)
    }
}

/// Substitute `${...}` occurrences in `text`
///
/// Plain names must resolve; dotted names fall through to the lazy
/// component-output class when no service variable matches.
pub fn interpolate(text: &str, scope: &VarScope, path: &Path) -> Result<String, ParseError> {
    let mut unresolved: Option<String> = None;

    let out = VAR_RE.replace_all(text, |caps: &regex::Captures| {
        let expr = &caps[1];
        match expr.split_once('.') {
            None => match scope.resolve_plain(expr) {
                Some(value) => value.to_string(),
                None => {
                    if unresolved.is_none() {
                        unresolved = Some(expr.to_string());
                    }
                    caps[0].to_string()
                }
            },
            Some((head, tail)) => match scope.resolve_dotted(head, tail) {
                Some(value) => value.to_string(),
                // Lazy component-output reference; the reconciler resolves it
                None => caps[0].to_string(),
            },
        }
    });

    match unresolved {
        Some(name) => Err(ParseError::UnresolvedVariable {
            name,
            path: path.to_path_buf(),
        }),
        None => Ok(out.into_owned()),
    }
}

/// Substitute `${component.output}` references against live outputs
///
/// Used at reconcile time, after the referenced components' stages have
/// completed. Unknown references are left intact; single pass, no
/// recursion.
pub fn resolve_output_refs(
    text: &str,
    outputs: &BTreeMap<String, BTreeMap<String, String>>,
) -> String {
    VAR_RE
        .replace_all(text, |caps: &regex::Captures| {
            let expr = &caps[1];
            match expr.split_once('.') {
                Some((component, output)) => outputs
                    .get(component)
                    .and_then(|map| map.get(output))
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string()),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn p() -> PathBuf {
        PathBuf::from("test.yaml")
    }

    #[test]
    fn test_plain_variable_resolution() {
        let stack: BTreeMap<_, _> = [("region".to_string(), "us-east-1".to_string())].into();
        let empty = BTreeMap::new();
        let cross = BTreeMap::new();
        let scope = VarScope::new(&stack, &empty, &cross);

        let out = interpolate("region: ${region}", &scope, &p()).unwrap();
        assert_eq!(out, "region: us-east-1");
    }

    #[test]
    fn test_service_vars_shadow_stack_vars() {
        let stack: BTreeMap<_, _> = [("tier".to_string(), "bronze".to_string())].into();
        let service: BTreeMap<_, _> = [("tier".to_string(), "gold".to_string())].into();
        let cross = BTreeMap::new();
        let scope = VarScope::new(&stack, &service, &cross);

        let out = interpolate("${tier}", &scope, &p()).unwrap();
        assert_eq!(out, "gold");
    }

    #[test]
    fn test_unresolved_plain_variable_errors() {
        let empty = BTreeMap::new();
        let cross = BTreeMap::new();
        let scope = VarScope::new(&empty, &empty, &cross);

        let err = interpolate("x: ${missing}", &scope, &p()).unwrap_err();
        assert!(matches!(err, ParseError::UnresolvedVariable { ref name, .. } if name == "missing"));
    }

    #[test]
    fn test_cross_service_lookup() {
        let empty = BTreeMap::new();
        let cross: BTreeMap<_, _> = [(
            "frontend".to_string(),
            BTreeMap::from([("cdn".to_string(), "dxxx.cloudfront.net".to_string())]),
        )]
        .into();
        let scope = VarScope::new(&empty, &empty, &cross);

        let out = interpolate("host: ${frontend.cdn}", &scope, &p()).unwrap();
        assert_eq!(out, "host: dxxx.cloudfront.net");
    }

    #[test]
    fn test_component_output_ref_left_lazy() {
        let empty = BTreeMap::new();
        let cross = BTreeMap::new();
        let scope = VarScope::new(&empty, &empty, &cross);

        let out = interpolate("DB_HOST: ${db.endpoint}", &scope, &p()).unwrap();
        assert_eq!(out, "DB_HOST: ${db.endpoint}");
    }

    #[test]
    fn test_resolve_output_refs() {
        let outputs: BTreeMap<_, _> = [(
            "db".to_string(),
            BTreeMap::from([("endpoint".to_string(), "db.internal:5432".to_string())]),
        )]
        .into();

        assert_eq!(
            resolve_output_refs("DB_HOST: ${db.endpoint}", &outputs),
            "DB_HOST: db.internal:5432"
        );
        // Unknown references stay intact
        assert_eq!(
            resolve_output_refs("${cache.url}", &outputs),
            "${cache.url}"
        );
    }

    #[test]
    fn test_no_recursive_expansion() {
        let stack: BTreeMap<_, _> = [("a".to_string(), "${b}".to_string())].into();
        let empty = BTreeMap::new();
        let cross = BTreeMap::new();
        let scope = VarScope::new(&stack, &empty, &cross);

        // The substituted value is not re-visited
        let out = interpolate("${a}", &scope, &p()).unwrap();
        assert_eq!(out, "${b}");
    }
}
