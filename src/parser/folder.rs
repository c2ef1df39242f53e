//! Folder-mode ingestion
//!
//! Layout:
//!
//! ```text
//! my-stack/
//! ├── stack.yaml
//! └── services/
//!     ├── backend/
//!     │   ├── service.yaml
//!     │   ├── database.yaml
//!     │   └── queue.yaml
//!     └── frontend/
//!         ├── service.yaml
//!         └── cdn.yaml
//! ```
//!
//! Missing `stack.yaml` is an error; a missing `services/` directory is an
//! empty stack (warning). Every component inherits `metadata.stack` and
//! `metadata.service` from its containing folder.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::warn;
use walkdir::WalkDir;

use super::{checksum, interpolate, parse_documents, ParseError, ResourceSet, VarScope};
use crate::schema::{ComponentSpec, Kind};

/// Parse a stack folder into a [`ResourceSet`]
pub fn parse_stack_folder(
    root: &Path,
    overrides: &BTreeMap<String, String>,
) -> Result<ResourceSet, ParseError> {
    let stack_path = root.join("stack.yaml");
    if !stack_path.is_file() {
        return Err(ParseError::MissingStackFile {
            path: root.to_path_buf(),
        });
    }

    let stack_raw = read(&stack_path)?;
    let mut sources: Vec<(String, String)> =
        vec![(stack_path.display().to_string(), stack_raw.clone())];

    // Phase one: stack document, no interpolation needed to read its own
    // variables (values are scalar strings).
    let stack_docs = parse_documents(&stack_raw, &stack_path)?;
    let stack = stack_docs
        .into_iter()
        .find(|r| r.kind == Kind::Stack)
        .ok_or(ParseError::NoStack)?;
    let mut variables = match &stack.spec {
        ComponentSpec::Stack(spec) => spec.variables.clone(),
        _ => BTreeMap::new(),
    };
    for (k, v) in overrides {
        variables.insert(k.clone(), v.clone());
    }

    let services_dir = root.join("services");
    if !services_dir.is_dir() {
        warn!(stack = %stack.metadata.name, "stack has no services/ directory; treating as empty");
        return Ok(ResourceSet {
            stack,
            services: Vec::new(),
            components: Vec::new(),
            variables,
            source_checksum: checksum(&[stack_raw.as_str()]),
        });
    }

    // Phase two: service documents, interpolated against stack scope.
    let empty = BTreeMap::new();
    let no_cross = BTreeMap::new();
    let stack_scope = VarScope::new(&variables, &empty, &no_cross);

    let mut service_dirs: Vec<_> = std::fs::read_dir(&services_dir)
        .map_err(|source| ParseError::Io {
            path: services_dir.clone(),
            source,
        })?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| e.path())
        .collect();
    service_dirs.sort();

    let mut services = Vec::new();
    let mut service_vars: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    for dir in &service_dirs {
        let service_path = dir.join("service.yaml");
        if !service_path.is_file() {
            return Err(ParseError::MissingServiceFile { path: dir.clone() });
        }
        let raw = read(&service_path)?;
        sources.push((service_path.display().to_string(), raw.clone()));

        let interpolated = interpolate(&raw, &stack_scope, &service_path)?;
        let folder_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        for mut resource in parse_documents(&interpolated, &service_path)? {
            if resource.kind != Kind::Service {
                continue;
            }
            resource.metadata.stack.get_or_insert(stack.metadata.name.clone());
            resource.metadata.name = folder_name.clone();
            if let ComponentSpec::Service(spec) = &resource.spec {
                service_vars.insert(folder_name.clone(), spec.variables.clone());
            }
            services.push(resource);
        }
    }

    // Phase three: component documents, interpolated against the service's
    // scope plus cross-service lookups.
    let mut components = Vec::new();
    for dir in &service_dirs {
        let folder_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let own_vars = service_vars.get(&folder_name).cloned().unwrap_or_default();
        let scope = VarScope::new(&variables, &own_vars, &service_vars);

        let mut files: Vec<_> = WalkDir::new(dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path().is_file()
                    && e.path()
                        .extension()
                        .is_some_and(|ext| ext == "yaml" || ext == "yml")
                    && e.path().file_name().is_some_and(|n| n != "service.yaml")
            })
            .map(|e| e.into_path())
            .collect();
        files.sort();

        for file in files {
            let raw = read(&file)?;
            sources.push((file.display().to_string(), raw.clone()));
            let interpolated = interpolate(&raw, &scope, &file)?;
            for mut resource in parse_documents(&interpolated, &file)? {
                if !resource.kind.is_component() {
                    continue;
                }
                resource.metadata.stack.get_or_insert(stack.metadata.name.clone());
                resource.metadata.service.get_or_insert(folder_name.clone());
                components.push(resource);
            }
        }
    }

    sources.sort_by(|a, b| a.0.cmp(&b.0));
    let contents: Vec<&str> = sources.iter().map(|(_, c)| c.as_str()).collect();

    Ok(ResourceSet {
        stack,
        services,
        components,
        variables,
        source_checksum: checksum(&contents),
    })
}

fn read(path: &Path) -> Result<String, ParseError> {
    std::fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_stack_fixture() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("stack.yaml"),
            r#"
kind: Stack
metadata: {name: app}
spec:
  provider: {name: aws, region: us-east-1}
  variables:
    env-suffix: dev
"#,
        )
        .unwrap();
        let backend = dir.path().join("services/backend");
        fs::create_dir_all(&backend).unwrap();
        fs::write(
            backend.join("service.yaml"),
            r#"
kind: Service
metadata: {name: backend}
spec:
  variables:
    db-name: orders
"#,
        )
        .unwrap();
        fs::write(
            backend.join("database.yaml"),
            r#"
kind: RDS
metadata: {name: db}
spec:
  engine: postgres
  allocatedStorage: 20
  databaseName: ${db-name}
  passwordSecret: arn:aws:secretsmanager:us-east-1:123456789012:secret:db
"#,
        )
        .unwrap();
        fs::write(
            backend.join("api.yaml"),
            r#"
kind: MicroService
metadata: {name: api}
dependsOn: [db]
spec:
  image: {repository: registry.example.com/api}
  platform: fargate
  ports: [{name: http, containerPort: 8080}]
  env:
    - name: DB_HOST
      valueFrom: {component: db, output: endpoint}
"#,
        )
        .unwrap();
        dir
    }

    #[test]
    fn test_folder_parse_inherits_scope() {
        let dir = write_stack_fixture();
        let set = parse_stack_folder(dir.path(), &BTreeMap::new()).unwrap();

        assert_eq!(set.stack_name(), "app");
        assert_eq!(set.services.len(), 1);
        assert_eq!(set.components.len(), 2);
        for c in &set.components {
            assert_eq!(c.stack(), Some("app"));
            assert_eq!(c.service(), Some("backend"));
        }
    }

    #[test]
    fn test_service_variable_interpolated_into_component() {
        let dir = write_stack_fixture();
        let set = parse_stack_folder(dir.path(), &BTreeMap::new()).unwrap();
        let db = set.component("db").unwrap();
        match &db.spec {
            ComponentSpec::Rds(spec) => {
                assert_eq!(spec.database_name.as_deref(), Some("orders"))
            }
            other => panic!("unexpected spec {other:?}"),
        }
    }

    #[test]
    fn test_missing_stack_yaml_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = parse_stack_folder(dir.path(), &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, ParseError::MissingStackFile { .. }));
    }

    #[test]
    fn test_missing_services_dir_is_empty_stack() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("stack.yaml"),
            r#"
kind: Stack
metadata: {name: empty-stack}
spec:
  provider: {name: aws, region: us-east-1}
"#,
        )
        .unwrap();
        let set = parse_stack_folder(dir.path(), &BTreeMap::new()).unwrap();
        assert!(set.components.is_empty());
    }

    #[test]
    fn test_var_override_wins_over_stack() {
        let dir = write_stack_fixture();
        let overrides: BTreeMap<_, _> =
            [("env-suffix".to_string(), "prod".to_string())].into();
        let set = parse_stack_folder(dir.path(), &overrides).unwrap();
        assert_eq!(set.variables["env-suffix"], "prod");
    }
}
