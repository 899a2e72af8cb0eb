use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

pub const MINIMAL: &str = r#"{
  "stack": { "name": "demo" },
  "dns": { "domain_name": "example.com" }
}"#;

pub const WITH_SERVICE: &str = r#"{
  "stack": { "name": "shop" },
  "dns": { "domain_name": "example.com" },
  "certificate": { "arn": "arn:aws:acm:ap-northeast-1:123:certificate/abc" },
  "database": {
    "name": "shop",
    "instance_class": "t3",
    "instance_size": "micro",
    "allocated_storage_gb": 20,
    "username": "admin"
  },
  "services": {
    "web": { "image": "web:1", "subdomain": "www", "use_database": true }
  }
}"#;

pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        Self { root }
    }

    pub fn write_config(&self, content: &str) {
        fs::write(self.root.path().join("stratus.json"), content).unwrap();
    }

    #[allow(dead_code)]
    pub fn write_overlay(&self, environment: &str, content: &str) {
        let path = self
            .root
            .path()
            .join(format!("stratus.{}.json", environment));
        fs::write(path, content).unwrap();
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    #[allow(dead_code)]
    pub fn state_path(&self, stack_id: &str) -> PathBuf {
        self.root
            .path()
            .join(".stratus")
            .join(stack_id)
            .join("state.json")
    }

    #[allow(dead_code)]
    pub fn read_state(&self, stack_id: &str) -> serde_json::Value {
        let content = fs::read_to_string(self.state_path(stack_id)).unwrap();
        serde_json::from_str(&content).unwrap()
    }
}
