//! Job Descriptor - Ordered Section/Key/Value Sink
//!
//! Written once per export as `key=value` INI text next to the project copy.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    name: String,
    entries: Vec<(String, String)>,
}

impl Section {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Inserts or overwrites `key`, keeping its first position.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobDescriptor {
    sections: Vec<Section>,
}

impl JobDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Section `name`, created at the end when absent.
    pub fn section(&mut self, name: &str) -> &mut Section {
        let index = match self.sections.iter().position(|s| s.name == name) {
            Some(index) => index,
            None => {
                self.sections.push(Section {
                    name: name.to_string(),
                    entries: vec![],
                });
                self.sections.len() - 1
            }
        };
        &mut self.sections[index]
    }

    pub fn set(&mut self, section: &str, key: impl Into<String>, value: impl Into<String>) {
        self.section(section).set(key, value);
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|s| s.name == section)
            .and_then(|s| s.get(key))
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.sections.iter().any(|s| s.name == name)
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn to_ini(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            let _ = writeln!(out, "[{}]", section.name);
            for (key, value) in &section.entries {
                let _ = writeln!(out, "{}={}", key, value);
            }
            out.push('\n');
        }
        out
    }

    pub fn write_to_file(&self, path: &Path) -> std::io::Result<()> {
        fs::write(path, self.to_ini())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_keep_insertion_order() {
        let mut d = JobDescriptor::new();
        d.set("region", "user", "alice");
        d.set("files", "paths", "0");
        d.set("region", "renderer", "CYCLES");
        d.set("region", "user", "bob");

        assert_eq!(d.get("region", "user"), Some("bob"));
        assert_eq!(
            d.to_ini(),
            "[region]\nuser=bob\nrenderer=CYCLES\n\n[files]\npaths=0\n\n"
        );
    }

    #[test]
    fn test_values_are_written_verbatim() {
        let mut d = JobDescriptor::new();
        d.set("region", "startframe", "1 ");
        d.set("region", "endframe", " 250");
        let ini = d.to_ini();
        assert!(ini.contains("startframe=1 \n"));
        assert!(ini.contains("endframe= 250\n"));
    }
}
