use once_cell::sync::Lazy;
use std::future::Future;

/// Runtime the terminal front end drives everything on.
pub static RUNTIME: Lazy<std::io::Result<tokio::runtime::Runtime>> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
});

pub fn block_on<F: Future>(fut: F) -> std::io::Result<F::Output> {
    match &*RUNTIME {
        Ok(rt) => Ok(rt.block_on(fut)),
        Err(e) => Err(std::io::Error::new(e.kind(), e.to_string())),
    }
}

pub fn normalize_url(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}
