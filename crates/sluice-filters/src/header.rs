//! Header add/set/remove filters

use async_trait::async_trait;
use http::{HeaderMap, HeaderName, HeaderValue};
use sluice_core::{Error, Result};
use sluice_router::{Filter, GatewayContext};

/// Which side of the exchange a header filter edits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderTarget {
    /// Request headers, edited in pre-process
    Request,
    /// Response headers, edited in post-process
    Response,
}

/// Header edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderOp {
    /// Append a value, keeping existing ones
    Add(HeaderValue),
    /// Replace every value
    Set(HeaderValue),
    /// Delete every value
    Remove,
}

/// Filter that edits one header on the request or the response
#[derive(Debug, Clone)]
pub struct HeaderFilter {
    name: &'static str,
    target: HeaderTarget,
    header: HeaderName,
    op: HeaderOp,
}

impl HeaderFilter {
    /// Create a header filter; the filter name is derived from target and op
    pub fn new(target: HeaderTarget, header: &str, op: HeaderOp) -> Result<Self> {
        let header = HeaderName::from_bytes(header.as_bytes())
            .map_err(|_| Error::invalid("name", "a valid header name"))?;
        let name = match (&op, target) {
            (HeaderOp::Add(_), HeaderTarget::Request) => "AddRequestHeader",
            (HeaderOp::Set(_), HeaderTarget::Request) => "SetRequestHeader",
            (HeaderOp::Remove, HeaderTarget::Request) => "RemoveRequestHeader",
            (HeaderOp::Add(_), HeaderTarget::Response) => "AddResponseHeader",
            (HeaderOp::Set(_), HeaderTarget::Response) => "SetResponseHeader",
            (HeaderOp::Remove, HeaderTarget::Response) => "RemoveResponseHeader",
        };
        Ok(Self {
            name,
            target,
            header,
            op,
        })
    }

    /// Parse a header value argument
    pub fn value(value: &str) -> Result<HeaderValue> {
        HeaderValue::from_str(value).map_err(|_| Error::invalid("value", "a valid header value"))
    }

    fn apply(&self, headers: &mut HeaderMap) {
        match &self.op {
            HeaderOp::Add(value) => {
                headers.append(self.header.clone(), value.clone());
            }
            HeaderOp::Set(value) => {
                headers.insert(self.header.clone(), value.clone());
            }
            HeaderOp::Remove => {
                headers.remove(&self.header);
            }
        }
    }
}

#[async_trait]
impl Filter for HeaderFilter {
    fn name(&self) -> &str {
        self.name
    }

    async fn pre_process(&self, ctx: &mut GatewayContext) -> Result<()> {
        if self.target == HeaderTarget::Request {
            self.apply(&mut ctx.request.headers);
        }
        Ok(())
    }

    async fn post_process(&self, ctx: &mut GatewayContext) -> Result<()> {
        if self.target == HeaderTarget::Response {
            if let Some(response) = ctx.response.as_mut() {
                self.apply(&mut response.headers);
            }
        }
        Ok(())
    }
}
