//! SurrealDB schema migrations and initialization
//!
//! Tables are schemaless; integrity comes from the unique indexes below:
//! - `(org_id, build_number)` rejects a reused build number
//! - `(build_id, instruction_id)` keeps one pin per instruction per build
//! - `(instruction_id, version_number)` keeps version numbers monotonic
//!
//! At most one main build per organization is kept by the `main_builds`
//! pointer record that every promote rewrites, not by an index.
//!
//! Safe to call on every connection (all definitions use `IF NOT EXISTS`).

use crate::error::StateError;
use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing instruction build schema");

    init_instruction_tables(db).await?;
    init_build_tables(db).await?;

    info!("Instruction build schema initialization complete");
    Ok(())
}

async fn init_instruction_tables(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing instruction tables");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS instructions SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_instruction_id ON TABLE instructions COLUMNS instruction_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_instruction_org ON TABLE instructions COLUMNS org_id;

        DEFINE TABLE IF NOT EXISTS instruction_versions SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_version_id ON TABLE instruction_versions COLUMNS version_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_version_number ON TABLE instruction_versions COLUMNS instruction_id, version_number UNIQUE;
    "#;

    db.query(sql)
        .await
        .and_then(|response| response.check())
        .map_err(|e| StateError::SchemaSetup(e.to_string()))?;
    Ok(())
}

async fn init_build_tables(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing build tables");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS builds SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_build_id ON TABLE builds COLUMNS build_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_build_org_number ON TABLE builds COLUMNS org_id, build_number UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_build_org_main ON TABLE builds COLUMNS org_id, is_main;

        DEFINE TABLE IF NOT EXISTS build_contents SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_content_pin ON TABLE build_contents COLUMNS build_id, instruction_id UNIQUE;

        -- One record per organization holding the last issued build number
        DEFINE TABLE IF NOT EXISTS build_counters SCHEMALESS;

        -- One record per organization naming its main build; promotes serialize on it
        DEFINE TABLE IF NOT EXISTS main_builds SCHEMALESS;
    "#;

    db.query(sql)
        .await
        .and_then(|response| response.check())
        .map_err(|e| StateError::SchemaSetup(e.to_string()))?;
    Ok(())
}
