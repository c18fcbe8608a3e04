use std::path::{Path, PathBuf};

use planmark_core::design::DesignState;
use planmark_io::{DesignSaver, JsonDesignStore};
use tracing::{info, warn};

use crate::errors::FrontendError;

/// 设计来源，便于前端呈现加载信息。
#[derive(Debug, Clone, PartialEq)]
pub enum DesignSource {
    File(PathBuf),
    Empty,
}

#[derive(Debug)]
pub struct LoadedDesign {
    pub state: DesignState,
    pub source: DesignSource,
    pub repairs: usize,
}

/// 读取设计文件；未指定路径时返回空设计。
pub fn load_design(path: Option<&Path>) -> Result<LoadedDesign, FrontendError> {
    let Some(path) = path else {
        return Ok(LoadedDesign {
            state: DesignState::new(),
            source: DesignSource::Empty,
            repairs: 0,
        });
    };

    let (state, report) = JsonDesignStore::new().load_with_report(path)?;
    if report.is_clean() {
        info!(path = %path.display(), entities = state.entity_count(), "设计文件加载成功");
    } else {
        warn!(
            path = %path.display(),
            repairs = report.len(),
            "设计文件加载时做了修复"
        );
    }
    Ok(LoadedDesign {
        state,
        source: DesignSource::File(path.to_path_buf()),
        repairs: report.len(),
    })
}

pub fn save_design(state: &DesignState, path: &Path) -> Result<(), FrontendError> {
    JsonDesignStore::new().save(state, path)?;
    info!(path = %path.display(), entities = state.entity_count(), "设计已保存");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_path_yields_empty_design() {
        let loaded = load_design(None).unwrap();
        assert_eq!(loaded.source, DesignSource::Empty);
        assert_eq!(loaded.state, DesignState::new());
    }

    #[test]
    fn saved_design_is_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.json");
        let mut state = DesignState::new();
        state.design_purpose = "school".into();

        save_design(&state, &path).unwrap();
        let loaded = load_design(Some(&path)).unwrap();
        assert_eq!(loaded.state, state);
        assert_eq!(loaded.repairs, 0);
        assert_eq!(loaded.source, DesignSource::File(path));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_design(Some(&dir.path().join("missing.json"))).unwrap_err();
        assert!(matches!(err, FrontendError::Design(_)));
    }
}
