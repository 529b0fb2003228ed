// src/config/validate.rs

use std::collections::HashMap;

use crate::config::model::{GraphFile, RawGraphFile};
use crate::errors::{Result, RundagError};

impl TryFrom<RawGraphFile> for GraphFile {
    type Error = crate::errors::RundagError;

    fn try_from(raw: RawGraphFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_graph(&raw)?;
        Ok(GraphFile::new_unchecked(raw))
    }
}

fn validate_raw_graph(raw: &RawGraphFile) -> Result<()> {
    ensure_has_tasks(raw)?;
    validate_task_dependencies(raw)?;
    validate_acyclic(raw)?;
    Ok(())
}

fn ensure_has_tasks(raw: &RawGraphFile) -> Result<()> {
    if raw.task.is_empty() {
        return Err(RundagError::ConfigError(
            "graph must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_task_dependencies(raw: &RawGraphFile) -> Result<()> {
    for (name, task) in raw.task.iter() {
        for dep in task.deps.iter() {
            if dep == name {
                return Err(RundagError::DagCycle(format!(
                    "task '{name}' depends on itself"
                )));
            }
            if !raw.task.contains_key(dep) {
                return Err(RundagError::ConfigError(format!(
                    "task '{name}' has unknown dependency '{dep}' in `deps`"
                )));
            }
        }
    }
    Ok(())
}

/// DFS colour for cycle detection.
#[derive(Clone, Copy, PartialEq)]
enum Colour {
    White,
    Grey,
    Black,
}

/// Cycle detection via depth-first search with a three-colour visited set.
///
/// Grey = on the current DFS path; hitting a grey node means a back edge,
/// i.e. a cycle. The error message names the whole cycle path so the user
/// can fix the document directly.
fn validate_acyclic(raw: &RawGraphFile) -> Result<()> {
    let mut colour: HashMap<&str, Colour> = raw
        .task
        .keys()
        .map(|name| (name.as_str(), Colour::White))
        .collect();

    for name in raw.task.keys() {
        if colour[name.as_str()] == Colour::White {
            let mut path = Vec::new();
            visit(raw, name, &mut colour, &mut path)?;
        }
    }
    Ok(())
}

fn visit<'a>(
    raw: &'a RawGraphFile,
    name: &'a str,
    colour: &mut HashMap<&'a str, Colour>,
    path: &mut Vec<&'a str>,
) -> Result<()> {
    colour.insert(name, Colour::Grey);
    path.push(name);

    if let Some(task) = raw.task.get(name) {
        for dep in task.deps.iter() {
            match colour.get(dep.as_str()) {
                Some(Colour::Grey) => {
                    let start = path.iter().position(|n| *n == dep.as_str()).unwrap_or(0);
                    let mut cycle: Vec<&str> = path[start..].to_vec();
                    cycle.push(dep.as_str());
                    return Err(RundagError::DagCycle(cycle.join(" -> ")));
                }
                Some(Colour::White) => visit(raw, dep.as_str(), colour, path)?,
                _ => {}
            }
        }
    }

    path.pop();
    colour.insert(name, Colour::Black);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::GraphFile;

    fn load(doc: &str) -> crate::errors::Result<GraphFile> {
        let raw: RawGraphFile = toml::from_str(doc).map_err(crate::errors::RundagError::from)?;
        GraphFile::try_from(raw)
    }

    #[test]
    fn accepts_valid_graph() {
        let graph = load(
            r#"
            [task.a]
            cmd = "echo a"

            [task.b]
            cmd = "echo b"
            deps = ["a"]
            "#,
        )
        .unwrap();
        assert_eq!(graph.task.len(), 2);
    }

    #[test]
    fn rejects_unknown_top_level_field() {
        let err = toml::from_str::<RawGraphFile>(
            r#"
            taskz = "oops"

            [task.a]
            cmd = "echo a"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("taskz"));
    }

    #[test]
    fn rejects_unknown_task_field() {
        assert!(
            toml::from_str::<RawGraphFile>(
                r#"
                [task.a]
                cmd = "echo a"
                comand = "typo"
                "#,
            )
            .is_err()
        );
    }

    #[test]
    fn rejects_unknown_dependency() {
        let err = load(
            r#"
            [task.a]
            cmd = "echo a"
            deps = ["ghost"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, RundagError::ConfigError(_)));
    }

    #[test]
    fn rejects_self_dependency() {
        let err = load(
            r#"
            [task.a]
            cmd = "echo a"
            deps = ["a"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, RundagError::DagCycle(_)));
    }

    #[test]
    fn rejects_two_task_cycle() {
        let err = load(
            r#"
            [task.a]
            cmd = "echo a"
            deps = ["b"]

            [task.b]
            cmd = "echo b"
            deps = ["a"]
            "#,
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("->"), "cycle path missing from: {msg}");
    }

    #[test]
    fn rejects_longer_cycle() {
        assert!(matches!(
            load(
                r#"
                [task.a]
                cmd = "a"
                deps = ["c"]
                [task.b]
                cmd = "b"
                deps = ["a"]
                [task.c]
                cmd = "c"
                deps = ["b"]
                "#,
            ),
            Err(RundagError::DagCycle(_))
        ));
    }

    #[test]
    fn rejects_bad_platform_tag() {
        assert!(
            toml::from_str::<RawGraphFile>(
                r#"
                [task.a]
                cmd = "echo a"
                platforms = ["beos"]
                "#,
            )
            .is_err()
        );
    }

    #[test]
    fn rejects_empty_graph() {
        assert!(matches!(load(""), Err(RundagError::ConfigError(_))));
    }
}
