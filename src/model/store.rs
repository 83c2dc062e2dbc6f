//! JSON persistence for trained forests.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use super::RandomForest;
use crate::features::FEATURE_NAMES;

/// File stem of the win classifier
pub const WIN_MODEL: &str = "win_model";

/// File stem of the place classifier
pub const PLACE_MODEL: &str = "place_model";

/// Directory holding serialized models
#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    /// Write a model, creating the directory if needed
    pub fn save(&self, name: &str, model: &RandomForest) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create model directory {}", self.dir.display()))?;

        let path = self.path(name);
        let content = serde_json::to_string(model)?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write model {}", path.display()))?;

        info!("Saved {} to {}", name, path.display());
        Ok(path)
    }

    /// Read a model and check it was trained on the current feature layout
    pub fn load(&self, name: &str) -> Result<RandomForest> {
        let path = self.path(name);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read model {}", path.display()))?;
        let model: RandomForest = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse model {}", path.display()))?;

        if model.feature_names() != &FEATURE_NAMES[..] {
            bail!(
                "Model {} was trained on features {:?}, expected {:?}",
                path.display(),
                model.feature_names(),
                FEATURE_NAMES
            );
        }
        if model.n_trees() == 0 {
            bail!("Model {} has no trees", path.display());
        }

        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ForestConfig;
    use ndarray::{Array1, Array2};
    use tempfile::TempDir;

    fn fitted(names: &[&str]) -> RandomForest {
        let x = Array2::from_shape_fn((20, names.len()), |(i, j)| (i * (j + 1)) as f64);
        let y = Array1::from_shape_fn(20, |i| if i >= 10 { 1.0 } else { 0.0 });
        let mut forest = RandomForest::new(ForestConfig {
            n_trees: 3,
            ..Default::default()
        });
        forest.fit(x.view(), y.view(), names).unwrap();
        forest
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path().join("models"));
        let forest = fitted(&FEATURE_NAMES);

        let path = store.save(WIN_MODEL, &forest).unwrap();
        assert!(path.ends_with("win_model.json"));

        let loaded = store.load(WIN_MODEL).unwrap();
        assert_eq!(loaded, forest);
    }

    #[test]
    fn test_load_rejects_other_feature_layout() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());
        store.save(PLACE_MODEL, &fitted(&["a", "b"])).unwrap();

        let err = store.load(PLACE_MODEL).unwrap_err();
        assert!(err.to_string().contains("trained on features"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());
        assert!(store.load(WIN_MODEL).is_err());
    }
}
