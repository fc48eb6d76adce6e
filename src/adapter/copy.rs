use std::fs;

use crate::adapter::{Adapter, Selector};
use crate::error::AdapterError;
use crate::output::Output;

/// Copies files byte for byte. The content is never looked at.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyAdapter;

impl Adapter for CopyAdapter {
    fn run(&self, input: &Selector) -> Result<Vec<Output>, AdapterError> {
        input
            .resolve()?
            .into_iter()
            .map(|source| Ok(Output::binary(source.relative, fs::read(&source.path)?)))
            .collect()
    }
}
