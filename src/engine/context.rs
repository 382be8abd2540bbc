use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Snippets of external context (live metrics, incident notes) for a query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnippets {
    pub snippets: Vec<String>,
}

impl ContextSnippets {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }

    #[inline]
    pub fn char_count(&self) -> usize {
        self.snippets.iter().map(|s| s.chars().count()).sum()
    }
}

/// Source of external context fetched alongside the query embedding
#[async_trait]
pub trait ContextSupplier: Send + Sync {
    async fn query_context(&self, query: &str) -> Result<ContextSnippets>;
}
