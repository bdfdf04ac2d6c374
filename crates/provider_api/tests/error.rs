use agent_provider::ProviderError;
use provider_api::error::{parse_error_message, status_error};
use provider_api::ApiError;
use reqwest::StatusCode;

#[test]
fn parse_error_message_is_friendly_on_usage_limit() {
    let body = r#"{"error":{"code":"usage_limit_reached","message":"cap exceeded","plan_type":"Pro","resets_at":1731234567}}"#;

    let message = parse_error_message(StatusCode::TOO_MANY_REQUESTS, body);
    assert!(message.contains("You have hit your usage limit"));
    assert!(message.contains("pro plan"));
}

#[test]
fn parse_error_message_uses_envelope_message() {
    let body = r#"{"error":{"type":"invalid_request_error","message":"invalid model"}}"#;
    let message = parse_error_message(StatusCode::BAD_REQUEST, body);
    assert_eq!(message, "invalid model");
}

#[test]
fn parse_error_message_falls_back_to_raw_body_then_reason() {
    assert_eq!(
        parse_error_message(StatusCode::INTERNAL_SERVER_ERROR, "raw failure text"),
        "raw failure text"
    );
    assert_eq!(
        parse_error_message(StatusCode::BAD_GATEWAY, ""),
        "Bad Gateway"
    );
}

#[test]
fn auth_statuses_map_to_provider_auth_errors() {
    let unauthorized = status_error(StatusCode::UNAUTHORIZED, r#"{"error":{"message":"expired"}}"#);
    assert!(matches!(unauthorized, ApiError::Unauthorized { .. }));
    assert_eq!(
        ProviderError::from(unauthorized),
        ProviderError::Auth {
            message: "expired".to_string()
        }
    );

    let bad_request = status_error(StatusCode::BAD_REQUEST, "nope");
    assert_eq!(
        ProviderError::from(bad_request),
        ProviderError::Status {
            status: 400,
            message: "nope".to_string()
        }
    );
}

#[test]
fn cancellation_maps_to_provider_cancelled() {
    assert_eq!(ProviderError::from(ApiError::Cancelled), ProviderError::Cancelled);
}
