//! Alarm transaction service + REST surface.
//!
//! Turns an activation request into a persisted alarm plus the context
//! needed to notify the right room. Persistence commits before any
//! broadcast; a dispatch failure is logged and never unwinds the
//! transaction or the HTTP response.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::db::{self, AlarmaRow, UserRow};
use crate::dispatch::{dispatch, AlertEvent};
use crate::error::AlertError;
use crate::rooms::Hub;
use crate::state::AppState;
use crate::types::{AlarmSummary, NeighborhoodId, UserId};

/// Persistence collaborator contract. `PgPool` is the production
/// implementation; tests substitute a mock.
pub trait AlarmStore {
    async fn find_user(&self, usuario_id: i32) -> Result<Option<UserRow>, AlertError>;
    async fn create_alarma(
        &self,
        usuario_id: i32,
        tipo: &str,
        descripcion: Option<&str>,
    ) -> Result<AlarmaRow, AlertError>;
}

impl AlarmStore for PgPool {
    async fn find_user(&self, usuario_id: i32) -> Result<Option<UserRow>, AlertError> {
        db::find_user(self, usuario_id).await
    }

    async fn create_alarma(
        &self,
        usuario_id: i32,
        tipo: &str,
        descripcion: Option<&str>,
    ) -> Result<AlarmaRow, AlertError> {
        db::insert_alarma(self, usuario_id, tipo, descripcion).await
    }
}

/// POST /api/alarmas/activar body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivarAlarmaRequest {
    #[serde(default)]
    pub tipo: Option<String>,
    #[serde(default)]
    pub descripcion: Option<String>,
    #[serde(default)]
    pub usuario_id: Option<UserId>,
}

/// Outcome of the persistence half of the transaction: the stored row
/// and the event ready for dispatch.
#[derive(Debug)]
pub struct AlarmActivation {
    pub alarma: AlarmaRow,
    pub event: AlertEvent,
}

/// Validate and persist an activation request, resolving the user's
/// neighborhood and display name. No broadcast happens here.
pub async fn activar_alarma<S: AlarmStore>(
    store: &S,
    req: ActivarAlarmaRequest,
) -> Result<AlarmActivation, AlertError> {
    let tipo = req
        .tipo
        .filter(|t| !t.trim().is_empty())
        .ok_or(AlertError::Validation("tipo"))?;
    let usuario_id: i32 = req
        .usuario_id
        .ok_or(AlertError::Validation("usuarioId"))?
        .0
        .parse()
        .map_err(|_| AlertError::Validation("usuarioId"))?;

    let user = store
        .find_user(usuario_id)
        .await?
        .ok_or_else(|| AlertError::UserNotFound(usuario_id.to_string()))?;
    let vecindario_id = user
        .vecindario_id
        .ok_or_else(|| AlertError::UserNotFound(format!("usuario {usuario_id} sin vecindario")))?;

    let alarma = store
        .create_alarma(usuario_id, &tipo, req.descripcion.as_deref())
        .await?;

    let mensaje = req
        .descripcion
        .clone()
        .unwrap_or_else(|| format!("¡Alarma de {tipo} activada en tu vecindario!"));
    let descripcion = req
        .descripcion
        .unwrap_or_else(|| format!("Alarma de {tipo}"));

    let event = AlertEvent::Alarm {
        neighborhood: NeighborhoodId::from(vecindario_id),
        emitter: user.display_name(),
        mensaje,
        summary: AlarmSummary {
            id: alarma.alarma_id,
            tipo: alarma.tipo.clone(),
            descripcion,
            fecha_hora: alarma.fecha_hora,
        },
    };

    Ok(AlarmActivation { alarma, event })
}

/// The full transaction: persist, then broadcast. The alarm row survives
/// a failed broadcast — delivery is best-effort.
pub async fn activate_and_dispatch<S: AlarmStore>(
    store: &S,
    hub: &Hub,
    req: ActivarAlarmaRequest,
) -> Result<AlarmaRow, AlertError> {
    let activation = activar_alarma(store, req).await?;
    let vecindario = activation.event.neighborhood().clone();
    match dispatch(hub, activation.event) {
        Ok(delivered) => {
            info!(alarma_id = activation.alarma.alarma_id, vecindario_id = %vecindario,
                  delivered, "alarm broadcast");
        }
        Err(e) => {
            warn!(alarma_id = activation.alarma.alarma_id, "dispatch failed after persist: {e}");
        }
    }
    Ok(activation.alarma)
}

/// Axum handler for POST /api/alarmas/activar.
pub async fn activar_alarma_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ActivarAlarmaRequest>,
) -> Result<impl IntoResponse, AlertError> {
    let alarma = activate_and_dispatch(&state.db, &state.hub, req).await?;
    Ok(Json(json!({
        "message": "Alarma activada exitosamente",
        "alarma": alarma,
        "notificacionEnviada": true,
    })))
}
