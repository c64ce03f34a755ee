//! HTTP client for the Ollama API.
//!
//! Covers the three endpoints the tool needs: non-streaming generation,
//! streaming generation over newline-delimited JSON, and model listing.
//! Transport failures map to [`Error::Unreachable`]/[`Error::Timeout`];
//! anything the server itself got wrong maps to [`Error::Api`].

use std::time::Duration;

use futures::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::Error;

const GENERATE_PATH: &str = "/api/generate";
const TAGS_PATH: &str = "/api/tags";

const NO_RESPONSE: &str = "No response returned from the model.";
const BAD_FORMAT: &str = "Unexpected response format from the model.";
const BAD_JSON: &str = "Invalid JSON response from Ollama.";
const BAD_STRUCTURE: &str = "Unexpected response structure from Ollama.";
const REQUEST_FAILED: &str = "Ollama request failed.";

/// Client for one Ollama host. Holds only immutable configuration; a fresh
/// one is built per invocation.
pub struct OllamaClient {
    host: String,
    http: Client,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

impl OllamaClient {
    /// Build a client for `host` with the given request timeout in seconds.
    ///
    /// When `api_key` is present every request carries a bearer token.
    /// Non-positive timeouts are passed through as a zero-length deadline.
    pub fn new(host: &str, timeout: i64, api_key: Option<&str>) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key {
            let bearer = HeaderValue::from_str(&format!("Bearer {key}")).map_err(|_| {
                Error::config("API key contains characters that cannot be sent in a header.")
            })?;
            headers.insert(AUTHORIZATION, bearer);
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(u64::try_from(timeout).unwrap_or(0)))
            .default_headers(headers)
            .build()
            .map_err(|err| Error::config(format!("Failed to create HTTP client: {err}")))?;

        Ok(Self {
            host: host.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Request a complete response for `prompt` and return its text.
    pub async fn generate(&self, model: &str, prompt: &str) -> Result<String, Error> {
        let request = GenerateRequest {
            model,
            prompt,
            stream: false,
        };
        let response = ensure_success(self.post(GENERATE_PATH, &request).await?).await?;
        let data = decode_json_body(response).await?;
        match data.get("response") {
            None | Some(Value::Null) => Err(Error::api(NO_RESPONSE)),
            Some(Value::String(text)) if text.is_empty() => Err(Error::api(NO_RESPONSE)),
            Some(Value::String(text)) => Ok(text.clone()),
            Some(_) => Err(Error::api(BAD_FORMAT)),
        }
    }

    /// Request a streamed response for `prompt`.
    ///
    /// The returned stream is lazy and single-pass: each pull reads from the
    /// open connection and yields one token. A server-side `error` event or a
    /// malformed line fails the pull it arrives on, after which the stream is
    /// exhausted. Completing without a single token is itself an error,
    /// reported once the body ends.
    pub async fn generate_stream(
        &self,
        model: &str,
        prompt: &str,
    ) -> Result<BoxStream<'static, Result<String, Error>>, Error> {
        let request = GenerateRequest {
            model,
            prompt,
            stream: true,
        };
        let response = ensure_success(self.post(GENERATE_PATH, &request).await?).await?;
        Ok(token_stream(response).boxed())
    }

    /// List the model names the server advertises, in server order.
    pub async fn list_models(&self) -> Result<Vec<String>, Error> {
        let response = ensure_success(self.get(TAGS_PATH).await?).await?;
        let data = decode_json_body(response).await?;
        Ok(extract_model_names(&data))
    }

    async fn post(&self, path: &str, body: &impl Serialize) -> Result<reqwest::Response, Error> {
        let url = format!("{}{}", self.host, path);
        debug!(%url, "POST");
        self.http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(transport_error)
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, Error> {
        let url = format!("{}{}", self.host, path);
        debug!(%url, "GET");
        self.http.get(&url).send().await.map_err(transport_error)
    }
}

/// Pass 2xx responses through; turn anything else into an API error built
/// from the error body.
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, Error> {
    if response.status().is_success() {
        return Ok(response);
    }
    let raw = response.text().await.unwrap_or_default();
    Err(Error::api(parse_error_message(&raw)))
}

/// Decode a whole-JSON response body into an object.
///
/// An empty body decodes to an empty object. A 2xx body that carries an
/// `error` field is still a failure.
async fn decode_json_body(response: reqwest::Response) -> Result<Map<String, Value>, Error> {
    let raw = response.text().await.map_err(transport_error)?;
    if raw.is_empty() {
        return Ok(Map::new());
    }
    let parsed: Value = serde_json::from_str(&raw).map_err(|_| Error::api(BAD_JSON))?;
    let Value::Object(object) = parsed else {
        return Err(Error::api(BAD_STRUCTURE));
    };
    if let Some(error) = object.get("error") {
        return Err(Error::api(error_field_message(error)));
    }
    Ok(object)
}

/// Turn the response body into a stream of tokens, decoding one JSON object
/// per line.
fn token_stream(response: reqwest::Response) -> impl Stream<Item = Result<String, Error>> {
    // State: (body, line buffer, yielded any token, body fully read, fused).
    stream::unfold(
        (response.bytes_stream(), String::new(), false, false, false),
        |(mut body, mut buffer, mut emitted, mut at_end, fused)| async move {
            if fused {
                return None;
            }
            loop {
                while let Some(pos) = buffer.find('\n') {
                    let line: String = buffer.drain(..=pos).collect();
                    match decode_stream_line(&line) {
                        Ok(None) => continue,
                        Ok(Some(token)) => {
                            emitted = true;
                            return Some((Ok(token), (body, buffer, emitted, at_end, false)));
                        }
                        Err(err) => return Some((Err(err), (body, buffer, emitted, at_end, true))),
                    }
                }

                if at_end {
                    // The final line may arrive without a trailing newline.
                    if !buffer.trim().is_empty() {
                        let line = std::mem::take(&mut buffer);
                        match decode_stream_line(&line) {
                            Ok(None) => {}
                            Ok(Some(token)) => {
                                emitted = true;
                                return Some((Ok(token), (body, buffer, emitted, at_end, false)));
                            }
                            Err(err) => {
                                return Some((Err(err), (body, buffer, emitted, at_end, true)))
                            }
                        }
                    }
                    if !emitted {
                        return Some((Err(Error::api(NO_RESPONSE)), (body, buffer, emitted, at_end, true)));
                    }
                    return None;
                }

                match body.next().await {
                    Some(Ok(chunk)) => buffer.push_str(&String::from_utf8_lossy(&chunk)),
                    Some(Err(err)) => {
                        return Some((Err(transport_error(err)), (body, buffer, emitted, at_end, true)))
                    }
                    None => at_end = true,
                }
            }
        },
    )
}

/// Decode one line of a streamed response.
///
/// `Ok(Some(token))` for a token line, `Ok(None)` for blank lines and
/// tokenless markers such as `{"done":true}`, `Err` for anything the
/// consumer must fail on.
fn decode_stream_line(line: &str) -> Result<Option<String>, Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let parsed: Value = serde_json::from_str(line).map_err(|_| Error::api(BAD_JSON))?;
    let Value::Object(object) = parsed else {
        return Err(Error::api(BAD_STRUCTURE));
    };
    if let Some(error) = object.get("error") {
        return Err(Error::api(error_field_message(error)));
    }
    match object.get("response") {
        None => Ok(None),
        Some(Value::String(token)) => Ok(Some(token.clone())),
        Some(_) => Err(Error::api(BAD_FORMAT)),
    }
}

/// Best-effort message from a non-2xx error body.
fn parse_error_message(raw: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        if let Some(message) = value.get("error").and_then(Value::as_str) {
            if !message.is_empty() {
                return message.to_string();
            }
        }
    }
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        REQUEST_FAILED.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Servers send `error` as a string, but don't count on it.
fn error_field_message(value: &Value) -> String {
    match value {
        Value::String(message) => message.clone(),
        other => other.to_string(),
    }
}

fn extract_model_names(data: &Map<String, Value>) -> Vec<String> {
    data.get("models")
        .and_then(Value::as_array)
        .map(|models| {
            models
                .iter()
                .filter_map(|model| model.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn transport_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        return Error::Timeout;
    }
    Error::Unreachable {
        reason: root_cause(&err),
    }
}

/// Innermost cause of a transport error; the outer layers only repeat the
/// URL and the request phase.
fn root_cause(err: &(dyn std::error::Error + 'static)) -> String {
    let mut cause = err;
    while let Some(source) = cause.source() {
        cause = source;
    }
    cause.to_string()
}
