//! Resource name sanitization.
//!
//! Every name handed to the cache goes through [sanitize_name] before it is used as a key or searched for, so that
//! `Textures\a.png`, `./Textures/a.png` and `/abs/path/to/Data/Textures/a.png` all end up as `Textures/a.png` once
//! `/abs/path/to/Data` is a registered resource directory.
use std::path::{Path, PathBuf};

/// A registered resource directory.
///
/// Stored with `/` separators and a trailing `/`, both as an absolute path and, when it lives under the base
/// directory, relative to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceDir {
    absolute: String,
    relative: Option<String>,
}

/// Convert a path into the internal string form: `/` separators, trailing `/`.
pub(crate) fn dir_string(path: &Path) -> String {
    let mut s = path.to_string_lossy().replace('\\', "/");
    if !s.ends_with('/') {
        s.push('/');
    }
    s
}

impl ResourceDir {
    pub fn new(absolute: &Path, base_dir: &Path) -> ResourceDir {
        let absolute = dir_string(absolute);
        let base = dir_string(base_dir);
        let relative = absolute
            .strip_prefix(base.as_str())
            .filter(|r| !r.is_empty())
            .map(str::to_string);
        ResourceDir { absolute, relative }
    }

    pub fn as_str(&self) -> &str {
        &self.absolute
    }

    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.absolute)
    }

    fn strip<'a>(&self, dir_part: &'a str) -> Option<&'a str> {
        dir_part.strip_prefix(self.absolute.as_str()).or_else(|| {
            self.relative
                .as_deref()
                .and_then(|r| dir_part.strip_prefix(r))
        })
    }
}

fn sanitize_once(name: &str, dirs: &[ResourceDir]) -> String {
    let mut out = name.replace('\\', "/").replace("../", "").replace("./", "");

    if !dirs.is_empty() {
        // Only the directory portion is compared, so a file which happens to be named like a directory is left alone.
        let split = out.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (dir_part, file_part) = out.split_at(split);
        if let Some(rest) = dirs.iter().find_map(|d| d.strip(dir_part)) {
            out = format!("{}{}", rest, file_part);
        }
    }

    out.trim().to_string()
}

/// Sanitize a resource name.
///
/// Converts separators to `/`, removes `../` and `./`, strips a leading registered resource directory and trims
/// whitespace.  The steps run to a fixpoint, so sanitizing an already sanitized name never changes it.
pub fn sanitize_name(name: &str, dirs: &[ResourceDir]) -> String {
    let mut current = sanitize_once(name, dirs);
    loop {
        let next = sanitize_once(&current, dirs);
        if next == current {
            return current;
        }
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn dirs() -> Vec<ResourceDir> {
        vec![
            ResourceDir::new(Path::new("/game/Data"), Path::new("/game")),
            ResourceDir::new(Path::new("/game/CoreData/"), Path::new("/game")),
        ]
    }

    #[test]
    fn test_basic_cleanup() {
        assert_eq!(sanitize_name("", &[]), "");
        assert_eq!(sanitize_name("Textures\\a.png", &[]), "Textures/a.png");
        assert_eq!(sanitize_name("./Textures/../a.png", &[]), "Textures/a.png");
        assert_eq!(sanitize_name("  Models/box.mdl \t", &[]), "Models/box.mdl");
    }

    #[test]
    fn test_strips_resource_dirs() {
        let d = dirs();
        assert_eq!(sanitize_name("/game/Data/Textures/a.png", &d), "Textures/a.png");
        assert_eq!(sanitize_name("/game/CoreData/b.xml", &d), "b.xml");
        // Relative to the base directory.
        assert_eq!(sanitize_name("Data/Textures/a.png", &d), "Textures/a.png");
        // Only directory portions match.
        assert_eq!(sanitize_name("/game/Datafile", &d), "/game/Datafile");
        assert_eq!(sanitize_name("/elsewhere/a.png", &d), "/elsewhere/a.png");
    }

    #[test]
    fn test_repeats_until_stable() {
        assert_eq!(sanitize_name("....//x", &[]), ".x");
        assert_eq!(sanitize_name(".../x", &[]), ".x");
        // Stripping one directory exposes another.
        assert_eq!(sanitize_name("/game/Data//game/Data/x", &dirs()), "x");
    }

    #[test]
    fn test_relative_form() {
        let d = ResourceDir::new(Path::new("/game/Data"), Path::new("/game/"));
        assert_eq!(d.as_str(), "/game/Data/");
        assert_eq!(d.relative.as_deref(), Some("Data/"));

        let outside = ResourceDir::new(Path::new("/other/Data"), Path::new("/game"));
        assert_eq!(outside.relative, None);
    }

    proptest! {
        #[test]
        fn test_idempotent(name in "[ a-zA-Z./\\\\]{0,32}") {
            let once = sanitize_name(&name, &[]);
            prop_assert_eq!(sanitize_name(&once, &[]), once.clone());
            prop_assert!(!once.contains("../"));
            prop_assert!(!once.contains("./"));
            prop_assert_eq!(once.trim(), once.as_str());
        }

        #[test]
        fn test_idempotent_with_dirs(prefix in prop::sample::select(vec!["", "/game/Data/", "Data/", "/game/", " ./"]), name in "[ a-zD./\\\\]{0,24}") {
            let d = dirs();
            let input = format!("{}{}", prefix, name);
            let once = sanitize_name(&input, &d);
            prop_assert_eq!(sanitize_name(&once, &d), once);
        }
    }
}
