// src/merging/db.rs

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info};
use postgres_types::ToSql;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tokio_postgres::{Row, Transaction};
use uuid::Uuid;

use super::plan::MergePlan;
use super::store::QuestionStore;
use crate::models::{Company, MergeOverview, MergedQuestion, QuestionMapping, RawQuestion};
use crate::utils::db_connect::PgPool;

// Configuration
const BATCH_SIZE_DB_OPS: usize = 500;
/// Key for `pg_advisory_xact_lock`; serializes concurrent rebuilds.
const REBUILD_LOCK_KEY: i64 = 0x5155_4553_4d52_4745;

type SqlParams = Vec<Box<dyn ToSql + Sync + Send>>;

// Newest first; Postgres sorts NULL scraped_at ahead of every timestamp under DESC.
const RAW_QUESTIONS_QUERY: &str = "
    SELECT id, content, english_content, source, source_url, company,
           question_type, llm_types, metadata, published_at
    FROM public.raw_questions
    ORDER BY scraped_at DESC, id
";

/// `QuestionStore` backed by the public.raw_questions, merged_questions,
/// question_mappings, companies and question_companies tables.
#[derive(Clone)]
pub struct PgQuestionStore {
    pool: PgPool,
}

impl PgQuestionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Row counts for raw and merged questions, raw questions per source and merged
    /// questions per primary label.
    pub async fn fetch_merge_overview(&self) -> Result<MergeOverview> {
        let conn = self.pool.get().await.context("Failed to get DB connection")?;

        let raw_questions: i64 = conn
            .query_one("SELECT COUNT(*) FROM public.raw_questions", &[])
            .await
            .context("Failed to count raw_questions")?
            .try_get(0)?;
        let merged_questions: i64 = conn
            .query_one("SELECT COUNT(*) FROM public.merged_questions", &[])
            .await
            .context("Failed to count merged_questions")?
            .try_get(0)?;

        let mut by_source = BTreeMap::new();
        for row in conn
            .query(
                "SELECT source, COUNT(*) AS count FROM public.raw_questions GROUP BY source",
                &[],
            )
            .await
            .context("Failed to count raw_questions by source")?
        {
            by_source.insert(row.try_get("source")?, row.try_get("count")?);
        }

        let mut by_type = BTreeMap::new();
        for row in conn
            .query(
                "SELECT question_type, COUNT(*) AS count
                 FROM public.merged_questions
                 WHERE question_type IS NOT NULL
                 GROUP BY question_type",
                &[],
            )
            .await
            .context("Failed to count merged_questions by type")?
        {
            by_type.insert(row.try_get("question_type")?, row.try_get("count")?);
        }

        Ok(MergeOverview {
            raw_questions,
            merged_questions,
            by_source,
            by_type,
        })
    }
}

impl QuestionStore for PgQuestionStore {
    async fn fetch_all_raw_questions(&self) -> Result<Vec<RawQuestion>> {
        let conn = self.pool.get().await.context("Failed to get DB connection")?;

        let rows = conn
            .query(RAW_QUESTIONS_QUERY, &[])
            .await
            .context("Failed to query public.raw_questions")?;

        rows.iter().map(raw_question_from_row).collect()
    }

    async fn replace_merged_questions(&self, plan: &MergePlan) -> Result<()> {
        let start = Instant::now();
        let mut client = self
            .pool
            .get()
            .await
            .context("Failed to get DB client for merge rebuild")?;
        let transaction = client
            .transaction()
            .await
            .context("Failed to start merge rebuild transaction")?;

        transaction
            .execute("SELECT pg_advisory_xact_lock($1)", &[&REBUILD_LOCK_KEY])
            .await
            .context("Failed to take merge rebuild lock")?;

        // --- 1. Clear previous merge state ---
        for table in ["question_companies", "question_mappings", "merged_questions"] {
            let deleted = transaction
                .execute(format!("DELETE FROM public.{}", table).as_str(), &[])
                .await
                .with_context(|| format!("Failed to clear public.{}", table))?;
            debug!("Cleared {} rows from public.{}", deleted, table);
        }

        // --- 2. Merged questions ---
        let merged_rows: Vec<SqlParams> = plan
            .merges
            .iter()
            .map(|planned| {
                let m = &planned.merged;
                let question_types = (!m.question_types.is_empty()).then(|| m.question_types.clone());
                let row: SqlParams = vec![
                    Box::new(m.id),
                    Box::new(m.canonical_content.clone()),
                    Box::new(m.english_content.clone()),
                    Box::new(m.question_type.clone()),
                    Box::new(question_types),
                    Box::new(m.frequency),
                    Box::new(m.first_seen_at),
                    Box::new(m.updated_at),
                    Box::new(m.updated_at),
                ];
                row
            })
            .collect();
        let inserted = batch_insert(
            &transaction,
            "public.merged_questions (id, canonical_content, english_content, question_type, question_types, frequency, first_seen_at, created_at, updated_at)",
            "",
            &merged_rows,
        )
        .await?;
        info!("Inserted {} merged questions", inserted);

        // --- 3. Mappings ---
        let mapping_rows: Vec<SqlParams> = plan
            .merges
            .iter()
            .flat_map(|planned| planned.mappings.iter())
            .map(|mapping| {
                let row: SqlParams = vec![
                    Box::new(mapping.raw_question_id),
                    Box::new(mapping.merged_question_id),
                    Box::new(mapping.similarity_score),
                ];
                row
            })
            .collect();
        let inserted = batch_insert(
            &transaction,
            "public.question_mappings (raw_question_id, merged_question_id, similarity_score)",
            "",
            &mapping_rows,
        )
        .await?;
        info!("Inserted {} question mappings", inserted);

        // --- 4. Companies and links ---
        let company_ids = get_or_create_companies(&transaction, plan).await?;
        let mut link_rows: Vec<SqlParams> = Vec::new();
        for planned in &plan.merges {
            for name in &planned.companies {
                let company_id = company_ids
                    .get(name)
                    .copied()
                    .with_context(|| format!("No company id resolved for '{}'", name))?;
                let row: SqlParams = vec![Box::new(planned.merged.id), Box::new(company_id)];
                link_rows.push(row);
            }
        }
        let inserted = batch_insert(
            &transaction,
            "public.question_companies (merged_question_id, company_id)",
            "ON CONFLICT DO NOTHING",
            &link_rows,
        )
        .await?;
        info!("Linked {} company associations", inserted);

        // --- 5. Verify before commit ---
        verify_frequencies(&transaction, plan).await?;

        transaction
            .commit()
            .await
            .context("Failed to commit merge rebuild")?;
        info!(
            "Merge tables replaced ({} merged, {} mappings) in {:.2?}",
            plan.len(),
            plan.total_mappings(),
            start.elapsed()
        );
        Ok(())
    }

    async fn fetch_merged_questions(&self) -> Result<Vec<MergedQuestion>> {
        let conn = self.pool.get().await.context("Failed to get DB connection")?;
        let rows = conn
            .query(
                "SELECT id, canonical_content, english_content, question_type, question_types,
                        frequency, first_seen_at, updated_at
                 FROM public.merged_questions
                 ORDER BY frequency DESC, canonical_content, id",
                &[],
            )
            .await
            .context("Failed to query public.merged_questions")?;

        rows.iter().map(merged_question_from_row).collect()
    }

    async fn fetch_mappings_for_merged(&self, merged_id: Uuid) -> Result<Vec<QuestionMapping>> {
        let conn = self.pool.get().await.context("Failed to get DB connection")?;
        let rows = conn
            .query(
                "SELECT raw_question_id, merged_question_id, similarity_score
                 FROM public.question_mappings
                 WHERE merged_question_id = $1
                 ORDER BY raw_question_id",
                &[&merged_id],
            )
            .await
            .with_context(|| format!("Failed to query mappings for merged question {}", merged_id))?;

        rows.iter().map(mapping_from_row).collect()
    }

    async fn fetch_mapping_for_raw(&self, raw_id: Uuid) -> Result<Option<QuestionMapping>> {
        let conn = self.pool.get().await.context("Failed to get DB connection")?;
        let row = conn
            .query_opt(
                "SELECT raw_question_id, merged_question_id, similarity_score
                 FROM public.question_mappings
                 WHERE raw_question_id = $1",
                &[&raw_id],
            )
            .await
            .with_context(|| format!("Failed to query mapping for raw question {}", raw_id))?;

        row.as_ref().map(mapping_from_row).transpose()
    }

    async fn fetch_companies_for_merged(&self, merged_id: Uuid) -> Result<Vec<Company>> {
        let conn = self.pool.get().await.context("Failed to get DB connection")?;
        let rows = conn
            .query(
                "SELECT c.id, c.name
                 FROM public.companies c
                 JOIN public.question_companies qc ON qc.company_id = c.id
                 WHERE qc.merged_question_id = $1
                 ORDER BY c.name",
                &[&merged_id],
            )
            .await
            .with_context(|| format!("Failed to query companies for merged question {}", merged_id))?;

        rows.iter()
            .map(|row| {
                Ok(Company {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                })
            })
            .collect()
    }
}

fn raw_question_from_row(row: &Row) -> Result<RawQuestion> {
    Ok(RawQuestion {
        id: row.try_get("id").context("raw_questions.id")?,
        content: row.try_get("content").context("raw_questions.content")?,
        english_content: row.try_get("english_content")?,
        source: row.try_get("source").context("raw_questions.source")?,
        source_url: row.try_get("source_url")?,
        company: row.try_get("company")?,
        question_type: row.try_get("question_type")?,
        llm_types: row.try_get("llm_types")?,
        metadata: row.try_get("metadata")?,
        published_at: row.try_get("published_at")?,
    })
}

fn merged_question_from_row(row: &Row) -> Result<MergedQuestion> {
    let canonical_content: String = row.try_get("canonical_content")?;
    let english_content: Option<String> = row.try_get("english_content")?;
    let question_types: Option<Vec<String>> = row.try_get("question_types")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

    Ok(MergedQuestion {
        id: row.try_get("id")?,
        english_content: english_content.unwrap_or_else(|| canonical_content.clone()),
        canonical_content,
        question_type: row.try_get("question_type")?,
        question_types: question_types.unwrap_or_default(),
        frequency: row.try_get("frequency")?,
        first_seen_at: row.try_get("first_seen_at")?,
        updated_at,
    })
}

fn mapping_from_row(row: &Row) -> Result<QuestionMapping> {
    let similarity_score: Option<f64> = row.try_get("similarity_score")?;
    Ok(QuestionMapping {
        raw_question_id: row.try_get("raw_question_id")?,
        merged_question_id: row.try_get("merged_question_id")?,
        similarity_score: similarity_score.unwrap_or_default(),
    })
}

/// Multi-row INSERT in chunks of `BATCH_SIZE_DB_OPS` rows. Returns rows affected.
async fn batch_insert(
    transaction: &Transaction<'_>,
    target: &str,
    suffix: &str,
    rows: &[SqlParams],
) -> Result<u64> {
    let mut affected = 0;

    for chunk in rows.chunks(BATCH_SIZE_DB_OPS) {
        let query = build_insert_query(target, suffix, chunk.iter().map(|row| row.len()));
        let params: Vec<&(dyn ToSql + Sync)> = chunk
            .iter()
            .flat_map(|row| row.iter().map(|b| b.as_ref() as &(dyn ToSql + Sync)))
            .collect();

        affected += transaction
            .execute(query.as_str(), &params[..])
            .await
            .with_context(|| format!("Failed to batch insert into {}", target))?;
    }

    Ok(affected)
}

/// `INSERT INTO {target} VALUES ($1, $2), ($3, $4) {suffix}` with one tuple per row,
/// numbering placeholders consecutively across rows.
fn build_insert_query(target: &str, suffix: &str, row_widths: impl Iterator<Item = usize>) -> String {
    let mut next = 1;
    let values: Vec<String> = row_widths
        .map(|width| {
            let placeholders: Vec<String> = (next..next + width).map(|n| format!("${}", n)).collect();
            next += width;
            format!("({})", placeholders.join(", "))
        })
        .collect();

    let mut query = format!("INSERT INTO {} VALUES {}", target, values.join(", "));
    if !suffix.is_empty() {
        query.push(' ');
        query.push_str(suffix);
    }
    query
}

/// Resolves every company name in `plan` to an id, creating the missing ones.
async fn get_or_create_companies(
    transaction: &Transaction<'_>,
    plan: &MergePlan,
) -> Result<HashMap<String, Uuid>> {
    let mut names: Vec<String> = plan
        .merges
        .iter()
        .flat_map(|m| m.companies.iter().cloned())
        .collect();
    names.sort();
    names.dedup();

    let mut company_ids: HashMap<String, Uuid> = HashMap::with_capacity(names.len());
    if names.is_empty() {
        return Ok(company_ids);
    }

    for row in transaction
        .query(
            "SELECT DISTINCT ON (name) id, name FROM public.companies WHERE name = ANY($1) ORDER BY name, id",
            &[&names],
        )
        .await
        .context("Failed to look up companies")?
    {
        company_ids.insert(row.try_get("name")?, row.try_get("id")?);
    }

    let missing: Vec<SqlParams> = names
        .iter()
        .filter(|name| !company_ids.contains_key(*name))
        .map(|name| {
            let row: SqlParams = vec![Box::new(Uuid::new_v4()), Box::new(name.clone())];
            row
        })
        .collect();

    if !missing.is_empty() {
        let created = batch_insert(transaction, "public.companies (id, name)", "", &missing).await?;
        info!("Created {} new companies", created);

        for row in transaction
            .query(
                "SELECT id, name FROM public.companies WHERE name = ANY($1)",
                &[&names],
            )
            .await
            .context("Failed to re-read companies")?
        {
            let name: String = row.try_get("name")?;
            let id: Uuid = row.try_get("id")?;
            company_ids.entry(name).or_insert(id);
        }
    }

    if company_ids.len() != names.len() {
        bail!(
            "Resolved {} of {} company names",
            company_ids.len(),
            names.len()
        );
    }
    Ok(company_ids)
}

/// Fails the transaction if any merged question's frequency differs from its mapping count,
/// or if the mapping total differs from the plan.
async fn verify_frequencies(transaction: &Transaction<'_>, plan: &MergePlan) -> Result<()> {
    let mismatched: i64 = transaction
        .query_one(
            "SELECT COUNT(*)
             FROM public.merged_questions mq
             LEFT JOIN (
                 SELECT merged_question_id, COUNT(*) AS n
                 FROM public.question_mappings
                 GROUP BY merged_question_id
             ) m ON m.merged_question_id = mq.id
             WHERE mq.frequency <> COALESCE(m.n, 0)",
            &[],
        )
        .await
        .context("Failed to verify merged question frequencies")?
        .try_get(0)?;
    if mismatched > 0 {
        bail!(
            "{} merged questions have a frequency that differs from their mapping count",
            mismatched
        );
    }

    let mappings: i64 = transaction
        .query_one("SELECT COUNT(*) FROM public.question_mappings", &[])
        .await
        .context("Failed to count question mappings")?
        .try_get(0)?;
    if usize::try_from(mappings).ok() != Some(plan.total_mappings()) {
        bail!(
            "Expected {} question mappings after rebuild, found {}",
            plan.total_mappings(),
            mappings
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_placeholders_number_across_rows() {
        let query = build_insert_query(
            "public.question_mappings (raw_question_id, merged_question_id, similarity_score)",
            "",
            [3, 3].into_iter(),
        );
        assert_eq!(
            query,
            "INSERT INTO public.question_mappings (raw_question_id, merged_question_id, similarity_score) \
             VALUES ($1, $2, $3), ($4, $5, $6)"
        );
    }

    #[test]
    fn test_insert_suffix_is_appended() {
        let query = build_insert_query(
            "public.question_companies (merged_question_id, company_id)",
            "ON CONFLICT DO NOTHING",
            std::iter::once(2),
        );
        assert_eq!(
            query,
            "INSERT INTO public.question_companies (merged_question_id, company_id) VALUES ($1, $2) ON CONFLICT DO NOTHING"
        );
    }

    #[test]
    fn test_full_chunk_stays_under_parameter_limit() {
        // merged_questions rows carry 9 columns; Postgres allows 65535 bind parameters.
        let query = build_insert_query("t (a)", "", std::iter::repeat(9).take(BATCH_SIZE_DB_OPS));
        let last = format!("${})", 9 * BATCH_SIZE_DB_OPS);
        assert!(query.ends_with(&last));
        assert!(9 * BATCH_SIZE_DB_OPS <= 65_535);
    }

    #[test]
    fn test_raw_questions_read_newest_first_with_id_tiebreak() {
        let order_by = RAW_QUESTIONS_QUERY
            .split("ORDER BY")
            .nth(1)
            .map(str::trim)
            .unwrap();
        assert_eq!(order_by, "scraped_at DESC, id");
    }
}
