// ABOUTME: VNC gateway serving a browser remote-desktop client per sandbox instance
// ABOUTME: Rewrites the provider preview URL into a websockify target and embeds it in a noVNC page

use axum::{
    extract::{Path, State},
    response::Html,
};
use deskrun_sandbox::InstanceId;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::state::AppState;

const NOVNC_RFB_MODULE: &str = "https://cdn.jsdelivr.net/npm/@novnc/novnc@1.4.0/core/rfb.js";

/// WebSocket endpoint for a noVNC websockify proxy behind `base_url`.
///
/// Only `http` and `https` bases are accepted; the scheme becomes `ws` or
/// `wss` and nothing else in the base changes. An absent token yields an
/// empty `token` query value.
pub fn websocket_target(base_url: &str, token: Option<&str>) -> Option<String> {
    let rewritten = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        return None;
    };

    Some(format!(
        "{}/websockify?token={}",
        rewritten.trim_end_matches('/'),
        token.unwrap_or_default()
    ))
}

/// Quote `value` as a JavaScript string literal safe inside a `<script>` element
pub fn js_string_literal(value: &str) -> String {
    // serde_json handles quotes, backslashes and control characters
    let quoted = serde_json::Value::String(value.to_string()).to_string();
    quoted
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026")
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

pub fn render_client_page(instance_id: InstanceId, target: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Sandbox {instance_id} desktop</title>
<style>
html, body {{ margin: 0; height: 100%; background: #1e1e1e; overflow: hidden; }}
#screen {{ width: 100%; height: 100%; }}
#status {{ position: fixed; top: 8px; left: 8px; color: #ccc; font: 13px sans-serif; z-index: 1; }}
</style>
</head>
<body>
<div id="status">Connecting...</div>
<div id="screen"></div>
<script type="module">
import RFB from '{module}';

const status = document.getElementById('status');
const rfb = new RFB(document.getElementById('screen'), {target});
rfb.scaleViewport = true;
rfb.resizeSession = true;
rfb.addEventListener('connect', () => {{ status.textContent = 'Connected'; }});
rfb.addEventListener('disconnect', (e) => {{
  status.textContent = e.detail.clean ? 'Disconnected' : 'Connection lost';
}});
rfb.addEventListener('securityfailure', (e) => {{
  status.textContent = 'Security failure: ' + e.detail.reason;
}});
</script>
</body>
</html>
"#,
        instance_id = instance_id,
        module = NOVNC_RFB_MODULE,
        target = js_string_literal(target),
    )
}

/// Serve the remote-desktop client page for one instance
pub async fn vnc_page(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Html<String>> {
    let instance_id: InstanceId = raw_id
        .parse()
        .map_err(|_| AppError::Validation(format!("Invalid instance id: {}", raw_id)))?;

    let record = state
        .registry
        .get(instance_id)
        .await
        .map_err(|e| AppError::NotFound(e.to_string()))?;

    let Some(base_url) = record.vnc_base_url.as_deref() else {
        return Err(AppError::VncNotReady(instance_id));
    };

    let Some(target) = websocket_target(base_url, record.vnc_token.as_deref()) else {
        warn!(instance_id, base_url, "Preview URL has an unsupported scheme");
        return Err(AppError::VncNotReady(instance_id));
    };

    info!(instance_id, "Serving VNC client page");
    Ok(Html(render_client_page(instance_id, &target)))
}
