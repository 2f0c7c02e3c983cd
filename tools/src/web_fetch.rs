//! `web_fetch` tool: a single GET request (`spec.md` §4.10 network category).

use ralph_core::tool_registry::ToolExecutor;
use ralph_core::types::ToolCall;
use ralph_core::types::ToolResult;

pub struct WebFetch {
    runtime: tokio::runtime::Runtime,
    client: reqwest::Client,
}

impl WebFetch {
    #[expect(clippy::expect_used)]
    pub fn new() -> Self {
        Self {
            runtime: tokio::runtime::Runtime::new().expect("failed to start web_fetch runtime"),
            client: reqwest::Client::new(),
        }
    }
}

impl Default for WebFetch {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolExecutor for WebFetch {
    fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(url) = call.argument_str("url") else {
            return ToolResult::err(call.id.clone(), r#"{"error":"missing url"}"#.to_string());
        };
        match self.runtime.block_on(fetch(&self.client, &url)) {
            Ok(body) => ToolResult::ok(call.id.clone(), body),
            Err(e) => ToolResult::err(call.id.clone(), format!(r#"{{"error":"{e}"}}"#)),
        }
    }
}

async fn fetch(client: &reqwest::Client, url: &str) -> Result<String, String> {
    let response = client.get(url).send().await.map_err(|e| e.to_string())?;
    let status = response.status().as_u16();
    let body = response.text().await.map_err(|e| e.to_string())?;
    const MAX_BODY: usize = 64 * 1024;
    let truncated: String = body.chars().take(MAX_BODY).collect();
    Ok(format!(
        r#"{{"status":{status},"body":{}}}"#,
        serde_json::to_string(&truncated).unwrap_or_default()
    ))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;
    use wiremock::matchers::method;
    use wiremock::matchers::path;

    fn call(args: &str) -> ToolCall {
        ToolCall { id: "1".to_string(), name: "web_fetch".to_string(), arguments_json: args.to_string() }
    }

    // `WebFetch::execute` drives its own runtime internally, so the mock
    // server is started and kept alive on a separate one here rather than
    // inside a `#[tokio::test]`, which would nest runtimes.
    fn start_mock_server() -> (tokio::runtime::Runtime, MockServer) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let server = rt.block_on(async {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/ok"))
                .respond_with(ResponseTemplate::new(200).set_body_string("hello from mock"))
                .mount(&server)
                .await;
            server
        });
        (rt, server)
    }

    #[test]
    fn fetch_returns_status_and_body() {
        let (_rt, server) = start_mock_server();
        let tool = WebFetch::new();
        let result = tool.execute(&call(&format!(r#"{{"url":"{}/ok"}}"#, server.uri())));
        assert!(result.success);
        assert!(result.result.contains(r#""status":200"#));
        assert!(result.result.contains("hello from mock"));
    }

    #[test]
    fn missing_url_errors() {
        let tool = WebFetch::new();
        let result = tool.execute(&call("{}"));
        assert!(!result.success);
    }

    #[test]
    fn unreachable_host_errors_without_panicking() {
        let tool = WebFetch::new();
        let result = tool.execute(&call(r#"{"url":"http://127.0.0.1:1"}"#));
        assert!(!result.success);
    }
}
