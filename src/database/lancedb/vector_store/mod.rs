
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, FixedSizeListArray, Float32Array, Int32Array, RecordBatchIterator, StringArray,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType, Table,
    query::{ExecutableQuery, QueryBase, Select},
};
use tracing::{debug, info, warn};

use crate::database::{
    Document, DocumentBackend, DocumentMetadata, SearchResult, SimilarityQuery, StoreStats,
    StoredDocument,
};
use crate::{RagError, Result};

const TABLE_NAME: &str = "documents";

/// Document store backed by a LanceDB table with a fixed-size vector column
pub struct LanceDocumentStore {
    connection: Connection,
    table_name: String,
    vector_dimension: usize,
}

/// One decoded table row
struct Row {
    document: StoredDocument,
    vector: Vec<f32>,
    distance: Option<f32>,
}

impl LanceDocumentStore {
    /// Open (or create) the document table under `db_path`
    ///
    /// # Arguments
    /// * `db_path` - Directory holding the LanceDB dataset
    /// * `dimension` - Vector length used when the table has to be created
    #[inline]
    pub async fn open(db_path: &Path, dimension: usize) -> Result<Self> {
        debug!("Initializing LanceDB at path: {:?}", db_path);

        std::fs::create_dir_all(db_path).map_err(|e| {
            RagError::Database(format!("Failed to create vector database directory: {}", e))
        })?;

        let uri = format!("file://{}", db_path.display());
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to connect to LanceDB: {}", e)))?;

        let mut store = Self {
            connection,
            table_name: TABLE_NAME.to_string(),
            vector_dimension: dimension,
        };
        store.initialize_table().await?;

        info!(
            "Document store initialized with {} dimensions",
            store.vector_dimension
        );
        Ok(store)
    }

    #[inline]
    pub fn vector_dimension(&self) -> usize {
        self.vector_dimension
    }

    async fn initialize_table(&mut self) -> Result<()> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to list tables: {}", e)))?;

        if table_names.contains(&self.table_name) {
            let existing = self.detect_existing_vector_dimension().await?;
            if existing != self.vector_dimension {
                warn!(
                    "Existing table uses {} dimensions, configured {}; keeping the table",
                    existing, self.vector_dimension
                );
                self.vector_dimension = existing;
            }
            return Ok(());
        }

        info!(
            "Creating document table with {} dimensions",
            self.vector_dimension
        );
        self.connection
            .create_empty_table(&self.table_name, self.schema())
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to create table: {}", e)))?;

        Ok(())
    }

    async fn detect_existing_vector_dimension(&self) -> Result<usize> {
        let schema = self
            .table()
            .await?
            .schema()
            .await
            .map_err(|e| RagError::Database(format!("Failed to get table schema: {}", e)))?;

        for field in schema.fields() {
            if field.name() == "vector" {
                if let DataType::FixedSizeList(_, size) = field.data_type() {
                    return usize::try_from(*size).map_err(|_| {
                        RagError::Database(format!("Invalid vector dimension: {}", size))
                    });
                }
            }
        }

        Err(RagError::Database(
            "Could not find vector column or determine dimension".to_string(),
        ))
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.vector_dimension as i32,
                ),
                false,
            ),
            Field::new("content", DataType::Utf8, false),
            Field::new("category", DataType::Utf8, true),
            Field::new("tags", DataType::Utf8, false),
            Field::new("source", DataType::Utf8, true),
            Field::new("priority", DataType::Int32, true),
            Field::new("extra", DataType::Utf8, false),
            Field::new("created_at", DataType::Utf8, false),
        ]))
    }

    async fn table(&self) -> Result<Table> {
        self.connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to open table: {}", e)))
    }

    fn create_record_batch(&self, documents: &[(&str, &str, &[f32], &DocumentMetadata)]) -> Result<RecordBatch> {
        let len = documents.len();
        let created_at = Utc::now().to_rfc3339();

        let mut ids = Vec::with_capacity(len);
        let mut flat_values = Vec::with_capacity(len * self.vector_dimension);
        let mut contents = Vec::with_capacity(len);
        let mut categories = Vec::with_capacity(len);
        let mut tags = Vec::with_capacity(len);
        let mut sources = Vec::with_capacity(len);
        let mut priorities = Vec::with_capacity(len);
        let mut extras = Vec::with_capacity(len);
        let mut created_ats = Vec::with_capacity(len);

        for &(id, content, vector, metadata) in documents {
            if vector.len() != self.vector_dimension {
                return Err(RagError::Database(format!(
                    "Document {} has {} dimensions, table expects {}",
                    id,
                    vector.len(),
                    self.vector_dimension
                )));
            }

            ids.push(id.to_string());
            flat_values.extend_from_slice(vector);
            contents.push(content.to_string());
            categories.push(metadata.category.clone());
            tags.push(serde_json::to_string(&metadata.tags).map_err(anyhow::Error::from)?);
            sources.push(metadata.source.clone());
            priorities.push(metadata.priority);
            extras.push(serde_json::to_string(&metadata.extra).map_err(anyhow::Error::from)?);
            created_ats.push(created_at.clone());
        }

        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let vector_array = FixedSizeListArray::try_new(
            field,
            self.vector_dimension as i32,
            Arc::new(Float32Array::from(flat_values)),
            None,
        )
        .map_err(|e| RagError::Database(format!("Failed to create vector array: {}", e)))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(contents)),
            Arc::new(StringArray::from(categories)),
            Arc::new(StringArray::from(tags)),
            Arc::new(StringArray::from(sources)),
            Arc::new(Int32Array::from(priorities)),
            Arc::new(StringArray::from(extras)),
            Arc::new(StringArray::from(created_ats)),
        ];

        RecordBatch::try_new(self.schema(), arrays)
            .map_err(|e| RagError::Database(format!("Failed to create record batch: {}", e)))
    }

    async fn write_rows(&self, rows: &[(&str, &str, &[f32], &DocumentMetadata)]) -> Result<()> {
        if rows.is_empty() {
            debug!("No documents to store");
            return Ok(());
        }

        let record_batch = self.create_record_batch(rows)?;
        let table = self.table().await?;

        // re-indexing replaces any previous version of the same ids
        let ids: Vec<String> = rows.iter().map(|(id, ..)| sql_literal(id)).collect();
        table
            .delete(&format!("id IN ({})", ids.join(", ")))
            .await
            .map_err(|e| RagError::Database(format!("Failed to replace documents: {}", e)))?;

        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to insert documents: {}", e)))?;

        debug!("Stored {} documents", rows.len());
        Ok(())
    }

    async fn collect_rows(
        mut results: lancedb::arrow::SendableRecordBatchStream,
    ) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| RagError::Database(format!("Failed to read result stream: {}", e)))?
        {
            rows.extend(parse_batch(&batch)?);
        }
        Ok(rows)
    }

    async fn find_row(&self, id: &str) -> Result<Option<Row>> {
        let results = self
            .table()
            .await?
            .query()
            .only_if(format!("id = {}", sql_literal(id)))
            .limit(1)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to query document: {}", e)))?;

        Ok(Self::collect_rows(results).await?.into_iter().next())
    }

    /// Build an ANN index on the vector column
    #[inline]
    pub async fn create_vector_index(&self) -> Result<()> {
        self.table()
            .await?
            .create_index(&["vector"], lancedb::index::Index::Auto)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to create vector index: {}", e)))?;

        info!("Vector index created successfully");
        Ok(())
    }

    /// Compact table fragments
    #[inline]
    pub async fn optimize(&self) -> Result<()> {
        self.table()
            .await?
            .optimize(lancedb::table::OptimizeAction::All)
            .await
            .map_err(|e| RagError::Database(format!("Failed to optimize table: {}", e)))?;

        info!("Vector database optimization completed");
        Ok(())
    }
}

#[async_trait]
impl DocumentBackend for LanceDocumentStore {
    fn name(&self) -> &'static str {
        "lancedb"
    }

    async fn upsert(&self, document: &Document) -> Result<()> {
        self.write_rows(&[(
            document.id.as_str(),
            document.content.as_str(),
            document.embedding.as_slice(),
            &document.metadata,
        )])
        .await
    }

    async fn upsert_batch(&self, documents: &[Document]) -> Result<()> {
        let rows: Vec<_> = documents
            .iter()
            .map(|d| {
                (
                    d.id.as_str(),
                    d.content.as_str(),
                    d.embedding.as_slice(),
                    &d.metadata,
                )
            })
            .collect();
        self.write_rows(&rows).await
    }

    async fn similarity_search(&self, query: SimilarityQuery<'_>) -> Result<Vec<SearchResult>> {
        debug!("Searching for similar vectors with limit: {}", query.limit);

        let table = self
            .table()
            .await
            .map_err(|e| RagError::VectorSearch(e.to_string()))?;

        let mut search = table
            .vector_search(query.vector)
            .map_err(|e| RagError::VectorSearch(format!("Failed to create vector search: {}", e)))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(query.limit);

        if let Some(category) = query.category {
            search = search.only_if(format!("category = {}", sql_literal(category)));
        }

        let results = search
            .execute()
            .await
            .map_err(|e| RagError::VectorSearch(format!("Failed to execute search: {}", e)))?;

        let mut matches: Vec<SearchResult> = Self::collect_rows(results)
            .await
            .map_err(|e| RagError::VectorSearch(e.to_string()))?
            .into_iter()
            .map(|row| {
                // cosine distance is 1 - similarity
                let similarity = (1.0 - row.distance.unwrap_or(1.0)).clamp(-1.0, 1.0);
                SearchResult::from_stored(row.document, similarity)
            })
            .collect();
        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));

        debug!("Parsed {} search results", matches.len());
        Ok(matches)
    }

    async fn text_search(
        &self,
        pattern: &str,
        limit: usize,
        category: Option<&str>,
    ) -> Result<Vec<StoredDocument>> {
        let like = format!("%{}%", escape_like(&pattern.to_lowercase()));
        let mut filter = format!("lower(content) LIKE {}", sql_literal(&like));
        if let Some(category) = category {
            filter = format!("{} AND category = {}", filter, sql_literal(category));
        }

        let results = self
            .table()
            .await?
            .query()
            .only_if(filter)
            .limit(limit)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to execute text search: {}", e)))?;

        Ok(Self::collect_rows(results)
            .await?
            .into_iter()
            .map(|row| row.document)
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Option<StoredDocument>> {
        Ok(self.find_row(id).await?.map(|row| row.document))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let table = self.table().await?;
        let predicate = format!("id = {}", sql_literal(id));

        let existing = table
            .count_rows(Some(predicate.clone()))
            .await
            .map_err(|e| RagError::Database(format!("Failed to count rows: {}", e)))?;
        if existing == 0 {
            return Ok(false);
        }

        table
            .delete(&predicate)
            .await
            .map_err(|e| RagError::Database(format!("Failed to delete document: {}", e)))?;

        info!("Deleted document: {}", id);
        Ok(true)
    }

    async fn update_metadata(&self, id: &str, metadata: &DocumentMetadata) -> Result<bool> {
        let Some(row) = self.find_row(id).await? else {
            return Ok(false);
        };

        self.write_rows(&[(
            row.document.id.as_str(),
            row.document.content.as_str(),
            row.vector.as_slice(),
            metadata,
        )])
        .await?;
        Ok(true)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let table = self.table().await?;

        let count = table
            .count_rows(None)
            .await
            .map_err(|e| RagError::Database(format!("Failed to count rows: {}", e)))?;

        let mut results = table
            .query()
            .select(Select::columns(&["category"]))
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to read categories: {}", e)))?;

        let mut counts = BTreeMap::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| RagError::Database(format!("Failed to read result stream: {}", e)))?
        {
            let categories = string_column(&batch, "category")?;
            for row in 0..batch.num_rows() {
                let category = if categories.is_null(row) {
                    "uncategorized".to_string()
                } else {
                    categories.value(row).to_string()
                };
                *counts.entry(category).or_insert(0_u64) += 1;
            }
        }

        Ok(StoreStats::from_counts(count as u64, counts))
    }

    async fn clear(&self) -> Result<()> {
        self.table()
            .await?
            .delete("true")
            .await
            .map_err(|e| RagError::Database(format!("Failed to clear documents: {}", e)))?;

        info!("Cleared all documents");
        Ok(())
    }
}

/// Quote a string as a SQL literal for LanceDB filters
fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Escape `LIKE` wildcards so the term matches literally; `\` is the
/// escape character of the arrow `like` kernel
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::Database(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| RagError::Database(format!("Invalid {} column type", name)))
}

fn optional_string(column: &StringArray, row: usize) -> Option<String> {
    if column.is_null(row) {
        None
    } else {
        Some(column.value(row).to_string())
    }
}

fn parse_batch(batch: &RecordBatch) -> Result<Vec<Row>> {
    let ids = string_column(batch, "id")?;
    let contents = string_column(batch, "content")?;
    let categories = string_column(batch, "category")?;
    let tags = string_column(batch, "tags")?;
    let sources = string_column(batch, "source")?;
    let extras = string_column(batch, "extra")?;

    let priorities = batch
        .column_by_name("priority")
        .ok_or_else(|| RagError::Database("Missing priority column".to_string()))?
        .as_any()
        .downcast_ref::<Int32Array>()
        .ok_or_else(|| RagError::Database("Invalid priority column type".to_string()))?;

    let vectors = batch
        .column_by_name("vector")
        .and_then(|col| col.as_any().downcast_ref::<FixedSizeListArray>());

    let distances = batch
        .column_by_name("_distance")
        .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

    let mut rows = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let metadata = DocumentMetadata {
            category: optional_string(categories, row),
            tags: serde_json::from_str(tags.value(row)).unwrap_or_default(),
            source: optional_string(sources, row),
            priority: if priorities.is_null(row) {
                None
            } else {
                Some(priorities.value(row))
            },
            extra: serde_json::from_str(extras.value(row)).unwrap_or_default(),
        };

        let vector = vectors
            .and_then(|list| {
                list.value(row)
                    .as_any()
                    .downcast_ref::<Float32Array>()
                    .map(|values| values.values().to_vec())
            })
            .unwrap_or_default();

        let distance = distances.and_then(|d| if d.is_null(row) { None } else { Some(d.value(row)) });

        rows.push(Row {
            document: StoredDocument {
                id: ids.value(row).to_string(),
                content: contents.value(row).to_string(),
                metadata,
            },
            vector,
            distance,
        });
    }

    Ok(rows)
}
