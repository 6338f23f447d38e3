// Module: Loader
// Reads story files (or whole suite directories) and hands them to the parser.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use crate::parser::parse_story;
use crate::story::Story;

/// Loads and parses a single story file.
pub fn load_story_from_file<P: AsRef<Path>>(path: P) -> Result<Story> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("falha ao ler '{}'", path.display()))?;
    let story = parse_story(&content)
        .map_err(|e| anyhow!("{}: {}", path.display(), e))?;
    Ok(story)
}

/// Loads every `*.yaml`/`*.yml` in a directory, sorted by file name.
/// Story order inside a suite is the file order, nothing else.
pub fn load_suite_from_dir<P: AsRef<Path>>(dir: P) -> Result<Vec<(PathBuf, Story)>> {
    let dir = dir.as_ref();
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("falha ao listar '{}'", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
        })
        .collect();
    paths.sort();

    if paths.is_empty() {
        return Err(anyhow!("nenhum arquivo .yaml/.yml em '{}'", dir.display()));
    }

    let mut stories = Vec::with_capacity(paths.len());
    for path in paths {
        let story = load_story_from_file(&path)?;
        stories.push((path, story));
    }
    Ok(stories)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("story_loader_{}_{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_load_single_story() {
        let dir = temp_dir("single");
        let path = dir.join("a.yaml");
        std::fs::write(&path, "name: minha story\n").unwrap();

        let story = load_story_from_file(&path).unwrap();
        assert_eq!(story.name, "minha story");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_parse_error_carries_file_name() {
        let dir = temp_dir("bad");
        let path = dir.join("quebrada.yaml");
        std::fs::write(&path, "description: sem nome\n").unwrap();

        let err = load_story_from_file(&path).unwrap_err().to_string();
        assert!(err.contains("quebrada.yaml"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_suite_loads_sorted_and_ignores_other_files() {
        let dir = temp_dir("suite");
        std::fs::write(dir.join("02_segunda.yaml"), "name: segunda\n").unwrap();
        std::fs::write(dir.join("01_primeira.yml"), "name: primeira\n").unwrap();
        std::fs::write(dir.join("notas.txt"), "ignorar").unwrap();

        let stories = load_suite_from_dir(&dir).unwrap();
        assert_eq!(stories.len(), 2);
        assert_eq!(stories[0].1.name, "primeira");
        assert_eq!(stories[1].1.name, "segunda");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_empty_dir_is_an_error() {
        let dir = temp_dir("empty");
        assert!(load_suite_from_dir(&dir).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
