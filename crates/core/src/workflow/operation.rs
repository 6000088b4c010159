use crate::config::RunOptions;
use crate::error::{FlowError, FlowResult};
use crate::transport::http::function_url;
use crate::transport::{InboundResponse, OutboundRequest, Transport};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Local byte-to-byte transform.
pub type TransformFn = Arc<dyn Fn(Bytes) -> FlowResult<Bytes> + Send + Sync>;

/// Receives an operation error; `None` suppresses it, `Some` fails the step with it.
pub type FailureHook = Arc<dyn Fn(FlowError) -> Option<FlowError> + Send + Sync>;

/// May rewrite an outbound request before it is sent.
pub type RequestHook = Arc<dyn Fn(&mut OutboundRequest) + Send + Sync>;

/// Turns a raw response into operation output, replacing the status check.
pub type ResponseHook = Arc<dyn Fn(InboundResponse) -> FlowResult<Bytes> + Send + Sync>;

/// Everything an operation can see while it runs.
#[derive(Clone)]
pub struct RunContext {
    pub options: RunOptions,
    pub transport: Arc<dyn Transport>,
}

/// Per-call options of an operation
#[derive(Clone, Default)]
pub struct CallOptions {
    headers: BTreeMap<String, String>,
    query: Vec<(String, String)>,
    method: Option<String>,
    on_failure: Option<FailureHook>,
    on_request: Option<RequestHook>,
    on_response: Option<ResponseHook>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a request header; keys are lower-cased.
    ///
    /// A `method` header is not sent: it selects the HTTP method, like
    /// [`method`](Self::method).
    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        let key = key.to_lowercase();
        if key == "method" {
            return self.method(value);
        }
        self.headers.insert(key, value.into());
        self
    }

    /// Add one or more values for a query parameter.
    pub fn query<I, S>(mut self, key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for value in values {
            self.query.push((key.to_string(), value.into()));
        }
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into().to_uppercase());
        self
    }

    pub fn on_failure(
        mut self,
        hook: impl Fn(FlowError) -> Option<FlowError> + Send + Sync + 'static,
    ) -> Self {
        self.on_failure = Some(Arc::new(hook));
        self
    }

    pub fn on_request(mut self, hook: impl Fn(&mut OutboundRequest) + Send + Sync + 'static) -> Self {
        self.on_request = Some(Arc::new(hook));
        self
    }

    pub fn on_response(
        mut self,
        hook: impl Fn(InboundResponse) -> FlowResult<Bytes> + Send + Sync + 'static,
    ) -> Self {
        self.on_response = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallOptions")
            .field("headers", &self.headers)
            .field("query", &self.query)
            .field("method", &self.method)
            .field("on_failure", &self.on_failure.is_some())
            .field("on_request", &self.on_request.is_some())
            .field("on_response", &self.on_response.is_some())
            .finish()
    }
}

/// What an operation does.
#[derive(Clone)]
pub enum OperationKind {
    /// Call a named function behind the run's gateway.
    Function(String),
    /// Call an explicit URL.
    HttpRequest(String),
    /// Transform bytes locally.
    Transform(TransformFn),
}

impl fmt::Debug for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function(name) => f.debug_tuple("Function").field(name).finish(),
            Self::HttpRequest(url) => f.debug_tuple("HttpRequest").field(url).finish(),
            Self::Transform(_) => f.write_str("Transform"),
        }
    }
}

/// A single unit of work in a step's chain.
#[derive(Debug, Clone)]
pub struct Operation {
    kind: OperationKind,
    options: CallOptions,
}

impl Operation {
    pub fn function(name: impl Into<String>, options: CallOptions) -> Self {
        Self {
            kind: OperationKind::Function(name.into()),
            options,
        }
    }

    pub fn http(url: impl Into<String>, options: CallOptions) -> Self {
        Self {
            kind: OperationKind::HttpRequest(url.into()),
            options,
        }
    }

    pub fn transform(transform: impl Fn(Bytes) -> FlowResult<Bytes> + Send + Sync + 'static) -> Self {
        Self {
            kind: OperationKind::Transform(Arc::new(transform)),
            options: CallOptions::default(),
        }
    }

    /// Attach options after construction, e.g. a failure hook on a transform.
    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    pub fn kind(&self) -> &OperationKind {
        &self.kind
    }

    /// Short name used in logs and errors.
    pub fn label(&self) -> String {
        match &self.kind {
            OperationKind::Function(name) => name.clone(),
            OperationKind::HttpRequest(url) => format!("http-request {}", url),
            OperationKind::Transform(_) => "transform".to_string(),
        }
    }

    /// Run the operation on `input`.
    ///
    /// Failures are offered to the failure hook first. A suppressed status
    /// failure continues with the response body, anything else with empty bytes.
    pub async fn execute(&self, input: Bytes, ctx: &RunContext) -> FlowResult<Bytes> {
        let result = match &self.kind {
            OperationKind::Function(name) => {
                info!(request_id = %ctx.options.request_id, function = %name, "executing function");
                match function_url(&ctx.options.gateway, name) {
                    Ok(url) => self.call(url, input, ctx).await,
                    Err(e) => Err(e),
                }
            }
            OperationKind::HttpRequest(url) => {
                info!(request_id = %ctx.options.request_id, url = %url, "executing http request");
                self.call(url.clone(), input, ctx).await
            }
            OperationKind::Transform(transform) => {
                info!(request_id = %ctx.options.request_id, "executing transform");
                run_transform(transform, input, &ctx.options)
            }
        };

        let err = match result {
            Ok(output) => return Ok(output),
            Err(err) => err,
        };
        let Some(hook) = &self.options.on_failure else {
            return Err(err);
        };
        let fallback = match &err {
            FlowError::Status { body, .. } => body.clone(),
            _ => Bytes::new(),
        };
        match hook(err) {
            Some(err) => Err(err),
            None => {
                tracing::debug!(operation = %self.label(), "failure suppressed by hook");
                Ok(fallback)
            }
        }
    }

    async fn call(&self, url: String, input: Bytes, ctx: &RunContext) -> FlowResult<Bytes> {
        ctx.options.check()?;

        let method = self
            .options
            .method
            .clone()
            .unwrap_or_else(|| ctx.options.default_method.clone());
        let mut request = OutboundRequest::new(method, url, input);
        request.header("content-type", "application/json");
        for (key, value) in &self.options.headers {
            request.header(key, value.clone());
        }
        request.query.extend(self.options.query.iter().cloned());

        if let Some(hook) = &self.options.on_request {
            hook(&mut request);
        }
        let target = request.url.clone();

        let send = tokio::time::timeout_at(ctx.options.deadline, ctx.transport.send(request));
        let response = tokio::select! {
            _ = ctx.options.cancel.cancelled() => return Err(FlowError::Cancelled),
            sent = send => sent.map_err(|_| ctx.options.deadline_error())??,
        };

        if let Some(hook) = &self.options.on_response {
            return hook(response);
        }
        if !response.is_success() {
            return Err(FlowError::Status {
                status: response.status,
                target,
                body: response.body,
            });
        }
        Ok(response.body)
    }
}

/// Transforms do no I/O, so the deadline is checked on both sides of the call.
fn run_transform(transform: &TransformFn, input: Bytes, options: &RunOptions) -> FlowResult<Bytes> {
    options.check()?;
    let output = transform(input)?;
    options.check()?;
    Ok(output)
}
