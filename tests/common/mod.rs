#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use rewrite_xml::{Config, Rule, SchemaValidation};
use tempfile::TempDir;

/// Schema accepting `<a>` with a single integer `<b>`
pub const INTEGER_SCHEMA: &str = r#"<?xml version="1.0"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="a">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="b" type="xs:integer"/>
      </xs:sequence>
    </xs:complexType>
  </xs:element>
</xs:schema>"#;

/// Temporary input/output directory pair
pub struct TestWorkspace {
    pub temp_dir: TempDir,
    pub input: PathBuf,
    pub output: PathBuf,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("input");
        let output = temp_dir.path().join("output");
        fs::create_dir_all(&input).unwrap();
        Self {
            temp_dir,
            input,
            output,
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn add_input(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.input.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    pub fn add_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.root().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    pub fn config(&self, rules: Vec<Rule>) -> Config {
        Config::new(&self.input, &self.output, rules)
    }

    pub fn config_with_schema(&self, rules: Vec<Rule>, schema: &str) -> Config {
        let schema_path = self.add_file("schema.xsd", schema);
        let mut config = self.config(rules);
        config.schema_validation = Some(SchemaValidation { schema_path });
        config
    }

    pub fn output_file(&self, relative: &str) -> PathBuf {
        self.output.join(relative)
    }

    pub fn read_output(&self, relative: &str) -> String {
        fs::read_to_string(self.output_file(relative)).unwrap()
    }

    pub fn read_log(&self, relative: &str) -> String {
        fs::read_to_string(self.output_file(relative).with_extension("log")).unwrap()
    }

    pub fn read_input(&self, relative: &str) -> String {
        fs::read_to_string(self.input.join(relative)).unwrap()
    }
}

pub fn rule(path: &str, expected: &str, new: &str) -> Rule {
    Rule::new(path, expected, Some(new.to_string()))
}
