use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};

use crate::BoxError;

/// Exposes a response after the endpoint has written it.
pub trait ResponseTracker {
	/// Either the default status code or the one actually written.
	fn status(&self) -> StatusCode;
	fn headers(&self) -> &HeaderMap;
	/// The buffered response body.
	fn body(&self) -> &Bytes;
}

/// Sink a tracked response is replayed into.
pub trait ResponseReplier {
	fn append_header(&mut self, name: HeaderName, value: HeaderValue);
	fn write_status(&mut self, status: StatusCode);
	fn write_body(&mut self, body: Bytes) -> Result<(), BoxError>;
}

/// A complete response as stored for a transaction.
///
/// It is both a tracker (the endpoint's response is captured into one) and a
/// replier (a stored response is written back into one), so it also serves as
/// the buffer when adapting to and from [`http::Response`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedResponse {
	#[serde(with = "http_serde::status_code")]
	pub status: StatusCode,
	/// Stored as ordered `[name, base64 value]` pairs so values that are not
	/// UTF-8 survive.
	#[serde(with = "headers_base64")]
	pub headers: HeaderMap,
	#[serde(with = "body_base64")]
	pub body: Bytes,
}

impl Default for TrackedResponse {
	fn default() -> Self {
		Self {
			status: StatusCode::OK,
			headers: HeaderMap::new(),
			body: Bytes::new(),
		}
	}
}

impl TrackedResponse {
	pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
		Self {
			status,
			headers,
			body,
		}
	}

	/// Capture everything observable about `tracker`.
	pub fn from_tracker<T: ResponseTracker + ?Sized>(tracker: &T) -> Self {
		Self {
			status: tracker.status(),
			headers: tracker.headers().clone(),
			body: tracker.body().clone(),
		}
	}

	pub fn into_http_response<B: From<Bytes>>(self) -> http::Response<B> {
		let mut response = http::Response::new(B::from(self.body));
		*response.status_mut() = self.status;
		*response.headers_mut() = self.headers;
		response
	}
}

impl ResponseTracker for TrackedResponse {
	fn status(&self) -> StatusCode {
		self.status
	}

	fn headers(&self) -> &HeaderMap {
		&self.headers
	}

	fn body(&self) -> &Bytes {
		&self.body
	}
}

impl ResponseReplier for TrackedResponse {
	fn append_header(&mut self, name: HeaderName, value: HeaderValue) {
		self.headers.append(name, value);
	}

	fn write_status(&mut self, status: StatusCode) {
		self.status = status;
	}

	fn write_body(&mut self, body: Bytes) -> Result<(), BoxError> {
		if self.body.is_empty() {
			self.body = body;
		} else {
			let mut buf = Vec::with_capacity(self.body.len() + body.len());
			buf.extend_from_slice(&self.body);
			buf.extend_from_slice(&body);
			self.body = Bytes::from(buf);
		}
		Ok(())
	}
}

mod body_base64 {
	use base64::Engine;
	use base64::engine::general_purpose::STANDARD;
	use bytes::Bytes;
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&STANDARD.encode(body))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
		let raw = String::deserialize(deserializer)?;
		STANDARD
			.decode(raw)
			.map(Bytes::from)
			.map_err(serde::de::Error::custom)
	}
}

mod headers_base64 {
	use base64::Engine;
	use base64::engine::general_purpose::STANDARD;
	use http::{HeaderMap, HeaderName, HeaderValue};
	use serde::de::Error as _;
	use serde::ser::SerializeSeq;
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(headers: &HeaderMap, serializer: S) -> Result<S::Ok, S::Error> {
		let mut seq = serializer.serialize_seq(Some(headers.len()))?;
		for (name, value) in headers {
			seq.serialize_element(&(name.as_str(), STANDARD.encode(value.as_bytes())))?;
		}
		seq.end()
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<HeaderMap, D::Error> {
		let pairs = Vec::<(String, String)>::deserialize(deserializer)?;
		let mut headers = HeaderMap::with_capacity(pairs.len());
		for (name, value) in pairs {
			let name = HeaderName::try_from(name).map_err(D::Error::custom)?;
			let value = STANDARD.decode(value).map_err(D::Error::custom)?;
			let value = HeaderValue::from_bytes(&value).map_err(D::Error::custom)?;
			headers.append(name, value);
		}
		Ok(headers)
	}
}
