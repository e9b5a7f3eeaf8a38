//! Postgres query layer.
//!
//! The fan-out core touches the database in exactly two places: resolving
//! a user (name + neighborhood) and inserting an alarm row. Everything
//! else about usuarios/vecindarios is owned by the administrative CRUD
//! service and is out of scope here.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::error::AlertError;

/// Row from `usuarios` with the fields the alarm transaction needs.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub usuario_id: i32,
    pub nombre: String,
    pub apellido: String,
    pub vecindario_id: Option<i32>,
}

impl UserRow {
    /// Display name used as the payload emitter.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.nombre, self.apellido)
    }
}

/// Persisted alarm, serialized back to the REST caller in the original
/// wire shape.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AlarmaRow {
    pub alarma_id: i32,
    pub tipo: String,
    pub descripcion: Option<String>,
    pub activo: bool,
    pub fecha_hora: DateTime<Utc>,
    pub usuario_id: i32,
}

/// Look up a user by id. `None` when the user does not exist.
pub async fn find_user(pool: &PgPool, usuario_id: i32) -> Result<Option<UserRow>, AlertError> {
    let row = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT usuario_id, nombre, apellido, vecindario_id
        FROM usuarios
        WHERE usuario_id = $1
        "#,
    )
    .bind(usuario_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Insert a new alarm, active and timestamped now.
pub async fn insert_alarma(
    pool: &PgPool,
    usuario_id: i32,
    tipo: &str,
    descripcion: Option<&str>,
) -> Result<AlarmaRow, AlertError> {
    let row = sqlx::query_as::<_, AlarmaRow>(
        r#"
        INSERT INTO alarmas (tipo, descripcion, activo, fecha_hora, usuario_id)
        VALUES ($1, $2, TRUE, NOW(), $3)
        RETURNING alarma_id, tipo, descripcion, activo, fecha_hora, usuario_id
        "#,
    )
    .bind(tipo)
    .bind(descripcion)
    .bind(usuario_id)
    .fetch_one(pool)
    .await?;
    Ok(row)
}
