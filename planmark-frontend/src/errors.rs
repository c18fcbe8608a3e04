use std::path::PathBuf;

use planmark_io::IoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrontendError {
    #[error("读取命令脚本 {path:?} 失败: {source}")]
    Script {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("replay 模式需要命令脚本路径")]
    MissingScript,
    #[error(transparent)]
    Design(#[from] IoError),
}
