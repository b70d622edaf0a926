//! Turns a batch into exactly one outgoing HTTP request.

use bytes::Bytes;
use http::{
    HeaderMap, HeaderName, HeaderValue, Method, Request, Uri,
    header::{CONTENT_DISPOSITION, CONTENT_TYPE},
};
use hyper::Body;
use snafu::{ResultExt, Snafu};

use crate::{
    message::Batch,
    sinks::util::multipart::{self, MultipartError, Section},
    template::{Template, TemplateRenderingError},
};

const DEFAULT_SECTION_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Snafu)]
pub enum BuildError {
    #[snafu(display("Failed to render template {:?}: {}", template, source))]
    RenderTemplate {
        template: String,
        source: TemplateRenderingError,
    },
    #[snafu(display("Rendered URL {:?} is invalid: {}", uri, source))]
    InvalidUri {
        uri: String,
        source: http::uri::InvalidUri,
    },
    #[snafu(display("Rendered value for header {:?} is invalid: {}", name, source))]
    InvalidHeaderValue {
        name: String,
        source: http::header::InvalidHeaderValue,
    },
    #[snafu(display("Failed to encode multipart body: {}", source))]
    EncodeMultipart { source: MultipartError },
}

/// Evaluates one configured multipart section against a batch.
#[derive(Clone, Debug)]
pub struct MultipartExpression {
    content_disposition: Template,
    content_type: Template,
    body: Template,
}

impl MultipartExpression {
    pub const fn new(
        content_disposition: Template,
        content_type: Template,
        body: Template,
    ) -> Self {
        Self {
            content_disposition,
            content_type,
            body,
        }
    }

    pub fn evaluate(&self, batch: &Batch) -> Result<Section, BuildError> {
        let content_disposition = render_string(&self.content_disposition, batch)?;
        let content_type = render_string(&self.content_type, batch)?;
        let body = self
            .body
            .render(batch)
            .context(RenderTemplateSnafu {
                template: self.body.get_ref(),
            })?;

        Ok(Section::new(body)
            .with_header(CONTENT_DISPOSITION.as_str(), content_disposition)
            .with_header(CONTENT_TYPE.as_str(), content_type))
    }
}

/// How the body of a request is assembled from a batch.
#[derive(Clone, Debug)]
pub enum RequestStrategy {
    /// One `multipart/form-data` section per configured expression.
    Explicit(Vec<MultipartExpression>),
    /// One `multipart/mixed` section per part of the batch.
    BatchAsMultipart,
    /// The raw payload of a single-part batch.
    Plain,
}

/// A fully assembled request, replayable once per attempt.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
}

impl HttpRequest {
    pub const fn method(&self) -> &Method {
        &self.method
    }

    pub const fn uri(&self) -> &Uri {
        &self.uri
    }

    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn to_http_request(&self) -> Request<Body> {
        let mut request = Request::new(Body::from(self.body.clone()));
        *request.method_mut() = self.method.clone();
        *request.uri_mut() = self.uri.clone();
        *request.headers_mut() = self.headers.clone();
        request
    }
}

#[derive(Clone, Debug)]
pub struct HttpRequestBuilder {
    uri: Template,
    method: Method,
    headers: Vec<(HeaderName, Template)>,
    strategy: RequestStrategy,
}

impl HttpRequestBuilder {
    pub const fn new(
        uri: Template,
        method: Method,
        headers: Vec<(HeaderName, Template)>,
        strategy: RequestStrategy,
    ) -> Self {
        Self {
            uri,
            method,
            headers,
            strategy,
        }
    }

    pub fn build(&self, batch: &Batch) -> Result<HttpRequest, BuildError> {
        let uri = render_string(&self.uri, batch)?;
        let uri = uri.parse::<Uri>().context(InvalidUriSnafu { uri })?;

        let mut headers = HeaderMap::with_capacity(self.headers.len() + 1);
        for (name, template) in &self.headers {
            headers.append(name.clone(), render_header(name, template, batch)?);
        }

        let (body, content_type) = match &self.strategy {
            RequestStrategy::Explicit(expressions) => {
                let sections = expressions
                    .iter()
                    .map(|expression| expression.evaluate(batch))
                    .collect::<Result<Vec<_>, _>>()?;
                let encoded = multipart::encode(&sections).context(EncodeMultipartSnafu)?;
                let content_type = encoded.content_type(multipart::FORM_DATA);
                (encoded.body, Some(content_type))
            }
            RequestStrategy::Plain if batch.len() == 1 => (batch[0].payload().clone(), None),
            // A direct write of several parts under the plain strategy falls back to one
            // request carrying every part.
            RequestStrategy::BatchAsMultipart | RequestStrategy::Plain => {
                let sections = self.sections_per_part(batch)?;
                let encoded = multipart::encode(&sections).context(EncodeMultipartSnafu)?;
                let content_type = encoded.content_type(multipart::MIXED);
                (encoded.body, Some(content_type))
            }
        };

        if let Some(content_type) = content_type {
            let value = HeaderValue::try_from(content_type).context(InvalidHeaderValueSnafu {
                name: CONTENT_TYPE.as_str(),
            })?;
            headers.insert(CONTENT_TYPE, value);
        }

        Ok(HttpRequest {
            method: self.method.clone(),
            uri,
            headers,
            body,
        })
    }

    /// Each section carries the part's raw payload and the `Content-Type` header rendered
    /// against that part alone.
    fn sections_per_part(&self, batch: &Batch) -> Result<Vec<Section>, BuildError> {
        let content_type = self
            .headers
            .iter()
            .find(|(name, _)| name == CONTENT_TYPE)
            .map(|(_, template)| template);

        batch
            .split_parts()
            .map(|single| -> Result<Section, BuildError> {
                let section_type = match content_type {
                    Some(template) => render_string(template, &single)?,
                    None => DEFAULT_SECTION_CONTENT_TYPE.to_owned(),
                };
                Ok(Section::new(single[0].payload().clone())
                    .with_header(CONTENT_TYPE.as_str(), section_type))
            })
            .collect()
    }
}

fn render_string(template: &Template, batch: &Batch) -> Result<String, BuildError> {
    template.render_string(batch).context(RenderTemplateSnafu {
        template: template.get_ref(),
    })
}

fn render_header(
    name: &HeaderName,
    template: &Template,
    batch: &Batch,
) -> Result<HeaderValue, BuildError> {
    let value = template.render(batch).context(RenderTemplateSnafu {
        template: template.get_ref(),
    })?;
    HeaderValue::from_maybe_shared(value).context(InvalidHeaderValueSnafu {
        name: name.as_str(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessagePart;

    fn template(src: &str) -> Template {
        Template::try_from(src).unwrap()
    }

    fn builder(strategy: RequestStrategy) -> HttpRequestBuilder {
        HttpRequestBuilder::new(
            template("http://localhost:4195/{{ metadata.topic }}"),
            Method::POST,
            vec![
                (CONTENT_TYPE, template("text/plain")),
                (HeaderName::from_static("x-batch-size"), template("{{ batch_size }}")),
            ],
            strategy,
        )
    }

    fn batch(payloads: &[&'static str]) -> Batch {
        payloads
            .iter()
            .map(|payload| MessagePart::from(*payload).with_metadata("topic", "events"))
            .collect()
    }

    fn decode(request: &HttpRequest) -> Vec<Section> {
        let content_type = request.headers()[CONTENT_TYPE].to_str().unwrap();
        let boundary = multipart::boundary_from_content_type(content_type)
            .unwrap()
            .unwrap();
        multipart::decode(request.body(), &boundary).unwrap()
    }

    #[test]
    fn plain_request_carries_raw_payload() {
        let request = builder(RequestStrategy::Plain)
            .build(&batch(&["hello world"]))
            .unwrap();

        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.uri(), "http://localhost:4195/events");
        assert_eq!(request.headers()[CONTENT_TYPE], "text/plain");
        assert_eq!(request.headers()["x-batch-size"], "1");
        assert_eq!(request.body(), "hello world");
    }

    #[test]
    fn plain_request_is_reproducible() {
        let builder = builder(RequestStrategy::Plain);
        let batch = batch(&["hello world"]);

        let first = builder.build(&batch).unwrap();
        let second = builder.build(&batch).unwrap();

        assert_eq!(first.uri(), second.uri());
        assert_eq!(first.headers(), second.headers());
        assert_eq!(first.body(), second.body());
    }

    #[test]
    fn batch_as_multipart_emits_one_section_per_part() {
        let request = builder(RequestStrategy::BatchAsMultipart)
            .build(&batch(&["first", "second", "third"]))
            .unwrap();

        let content_type = request.headers()[CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("multipart/mixed; boundary="));
        assert_eq!(request.headers()["x-batch-size"], "3");

        let sections = decode(&request);
        let bodies: Vec<_> = sections.iter().map(Section::body).collect();
        assert_eq!(bodies, ["first", "second", "third"]);
        assert!(
            sections
                .iter()
                .all(|section| section.header("content-type") == Some("text/plain"))
        );
    }

    #[test]
    fn plain_strategy_falls_back_to_multipart_for_several_parts() {
        let request = builder(RequestStrategy::Plain)
            .build(&batch(&["first", "second"]))
            .unwrap();

        let content_type = request.headers()[CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("multipart/mixed; boundary="));
        assert_eq!(decode(&request).len(), 2);
    }

    #[test]
    fn explicit_expressions_ignore_part_count() {
        let expressions = vec![
            MultipartExpression::new(
                template(r#"form-data; name="text""#),
                template("text/plain"),
                template("PART-A"),
            ),
            MultipartExpression::new(
                template(r#"form-data; name="{{ metadata.topic }}""#),
                template("application/octet-stream"),
                template("{{ content }}"),
            ),
        ];
        let builder = builder(RequestStrategy::Explicit(expressions));

        for parts in [&["only"][..], &["first", "second", "third"][..]] {
            let request = builder.build(&batch(parts)).unwrap();
            let content_type = request.headers()[CONTENT_TYPE].to_str().unwrap();
            assert!(content_type.starts_with("multipart/form-data; boundary="));

            let sections = decode(&request);
            assert_eq!(sections.len(), 2);
            assert_eq!(
                sections[0].header("content-disposition"),
                Some(r#"form-data; name="text""#)
            );
            assert_eq!(sections[0].header("content-type"), Some("text/plain"));
            assert_eq!(sections[0].body(), "PART-A");
            assert_eq!(
                sections[1].header("content-disposition"),
                Some(r#"form-data; name="events""#)
            );
            assert_eq!(sections[1].body(), parts[0]);
        }
    }

    #[test]
    fn missing_metadata_is_a_construction_error() {
        let error = builder(RequestStrategy::Plain)
            .build(&Batch::from_payloads(["no metadata"]))
            .unwrap_err();

        assert!(matches!(error, BuildError::RenderTemplate { .. }));
    }

    #[test]
    fn invalid_rendered_uri_is_a_construction_error() {
        let builder = HttpRequestBuilder::new(
            template("{{ content }}"),
            Method::POST,
            vec![],
            RequestStrategy::Plain,
        );

        let error = builder
            .build(&Batch::from_payloads(["not a uri\n"]))
            .unwrap_err();

        assert!(matches!(error, BuildError::InvalidUri { .. }));
    }

    #[test]
    fn to_http_request_copies_everything() {
        let request = builder(RequestStrategy::Plain)
            .build(&batch(&["hello"]))
            .unwrap()
            .to_http_request();

        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.uri(), "http://localhost:4195/events");
        assert_eq!(request.headers()["x-batch-size"], "1");
    }
}
