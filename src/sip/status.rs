//! Mapping from final SIP status codes to backend close statuses.

/// Classify the last SIP status code of a disconnected call.
///
/// The resulting string is reported to the backend when the session is
/// closed, unless the call was already marked `transferred`.
pub fn close_status_for(last_status_code: u16) -> &'static str {
    match last_status_code {
        200 => "completed",
        603 => "declined",
        486 => "busy",
        487 => "canceled",
        408 | 480 => "noanswer",
        404 => "not_found",
        503 | 504 => "network_error",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_status_mapping() {
        assert_eq!(close_status_for(200), "completed");
        assert_eq!(close_status_for(603), "declined");
        assert_eq!(close_status_for(486), "busy");
        assert_eq!(close_status_for(487), "canceled");
        assert_eq!(close_status_for(480), "noanswer");
        assert_eq!(close_status_for(408), "noanswer");
        assert_eq!(close_status_for(404), "not_found");
        assert_eq!(close_status_for(503), "network_error");
        assert_eq!(close_status_for(504), "network_error");
        assert_eq!(close_status_for(500), "unknown");
        assert_eq!(close_status_for(0), "unknown");
    }
}
