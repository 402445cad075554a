//! Route calculation message handler

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_nats::{Client, Subject, Subscriber};
use futures::StreamExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::services::planner::{PlanningError, RoutePlanner};
use crate::types::{CalculateRoutesRequest, ErrorResponse, Request, SuccessResponse};

/// Handle routes.calculate messages
///
/// Each request is planned in its own task so a large plan does not hold up
/// the requests behind it.
pub async fn handle_calculate(
    client: Client,
    mut subscriber: Subscriber,
    planner: Arc<RoutePlanner>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received routes.calculate message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<CalculateRoutesRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let client = client.clone();
        let planner = Arc::clone(&planner);
        tokio::spawn(async move {
            let request_id = request.id;
            if let Err(e) = process_calculate(&client, reply, request, &planner).await {
                error!("Failed to reply to routes.calculate {}: {}", request_id, e);
            }
        });
    }

    Ok(())
}

async fn process_calculate(
    client: &Client,
    reply: Subject,
    request: Request<CalculateRoutesRequest>,
    planner: &RoutePlanner,
) -> Result<()> {
    let started_at = Instant::now();

    let bytes = match planner.plan(&request.payload).await {
        Ok(routes) => {
            info!(
                "Planned request {}: {} routes in {} ms",
                request.id,
                routes.len(),
                started_at.elapsed().as_millis()
            );
            serde_json::to_vec(&SuccessResponse::new(request.id, routes))?
        }
        Err(e) => {
            match &e {
                PlanningError::InvalidInput(_) => warn!("Rejected request {}: {}", request.id, e),
                PlanningError::Internal { .. } => error!("Planning failed for request {}: {}", request.id, e),
            }
            serde_json::to_vec(&error_response(request.id, &e))?
        }
    };

    client.publish(reply, bytes.into()).await?;
    Ok(())
}

/// Error envelope for a failed plan
pub fn error_response(request_id: Uuid, err: &PlanningError) -> ErrorResponse {
    let response = ErrorResponse::new(request_id, err.code(), err.to_string());
    match err.details() {
        Some(details) => response.with_details(details),
        None => response,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_envelope_parses() {
        let raw = r#"{
            "id": "6f1c1d1e-8c1a-4d55-9a53-3c6f1f0b2a11",
            "timestamp": "2026-03-02T08:00:00Z",
            "payload": {
                "loosePackages": [{"postal": "19406", "trackingId": "TBA100"}],
                "drivers": [{"id": 1, "maxHours": 6}]
            }
        }"#;

        let request: Request<CalculateRoutesRequest> = serde_json::from_str(raw).unwrap();
        assert_eq!(request.payload.loose_packages.len(), 1);
        assert_eq!(request.payload.drivers[0].max_hours, 6.0);
        assert!(request.payload.bags.is_empty());
    }

    #[test]
    fn test_error_response_for_invalid_input() {
        let id = Uuid::new_v4();
        let err = PlanningError::InvalidInput("at least one driver is required".to_string());

        let response = error_response(id, &err);
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(response.id, id);
        assert_eq!(json["error"]["code"], "INVALID_REQUEST");
        assert_eq!(json["error"]["message"], "invalid request: at least one driver is required");
        assert!(response.error.details.is_none());
    }
}
