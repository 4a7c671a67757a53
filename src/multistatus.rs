//! 207 Multi-Status responses.
//!
//! Operations on a tree collect a status per path. If the only thing to
//! report is the outcome for the request path itself, a plain response
//! with that status is sent instead.
use headers::HeaderMapExt;
use http::{Response, StatusCode};
use xml::writer::{EventWriter, XmlEvent as XmlWEvent};
use xml::EmitterConfig;
use xmltree::Element;

use crate::body::Body;
use crate::davpath::DavPath;
use crate::util::MemBuffer;
use crate::xmltree_ext::{ElementExt, DAV_NS};
use crate::DavResult;

fn status_line(status: StatusCode) -> String {
    format!("HTTP/1.1 {status}")
}

fn href(path: &DavPath) -> Element {
    Element::new_text("D:href", path.as_url_string_with_prefix())
}

/// Serialize `<D:multistatus>` with the given `<D:response>` elements.
pub(crate) fn multistatus_body(responses: &[Element]) -> DavResult<Body> {
    let mut buf = MemBuffer::new();
    {
        let mut xw = EventWriter::new_with_config(
            &mut buf,
            EmitterConfig::new().perform_indent(false),
        );
        xw.write(XmlWEvent::start_element("D:multistatus").ns("D", DAV_NS))?;
        for r in responses {
            r.write_ev(&mut xw)?;
        }
        xw.write(XmlWEvent::end_element())?;
    }
    Ok(Body::from(buf.take()))
}

/// A complete 207 response.
pub(crate) fn multistatus_response(responses: &[Element]) -> DavResult<Response<Body>> {
    let mut res = Response::new(multistatus_body(responses)?);
    *res.status_mut() = StatusCode::MULTI_STATUS;
    res.headers_mut().typed_insert(headers::ContentType::xml());
    Ok(res)
}

/// `<D:response>` with one `<D:propstat>` per distinct status.
pub(crate) fn propstat_response(path: &DavPath, props: Vec<(StatusCode, Element)>) -> Element {
    let mut groups: Vec<(StatusCode, Element)> = Vec::new();
    for (status, prop) in props {
        match groups.iter_mut().find(|(s, _)| *s == status) {
            Some((_, p)) => p.push_element(prop),
            None => {
                let mut p = Element::new2("D:prop");
                p.push_element(prop);
                groups.push((status, p));
            }
        }
    }
    let mut resp = Element::new2("D:response");
    resp.push_element(href(path));
    for (status, prop) in groups {
        let mut ps = Element::new2("D:propstat");
        ps.push_element(prop);
        ps.push_element(Element::new_text("D:status", status_line(status)));
        resp.push_element(ps);
    }
    resp
}

/// `<D:response>` with just a status.
pub(crate) fn status_response(path: &DavPath, status: StatusCode) -> Element {
    let mut resp = Element::new2("D:response");
    resp.push_element(href(path));
    resp.push_element(Element::new_text("D:status", status_line(status)));
    resp
}

/// Status per path for COPY, MOVE and DELETE.
///
/// Successes are only listed if the response ends up as a 207.
#[derive(Debug, Default)]
pub(crate) struct MultiStatus {
    items: Vec<(DavPath, StatusCode)>,
}

impl MultiStatus {
    pub(crate) fn new() -> MultiStatus {
        MultiStatus::default()
    }

    pub(crate) fn add(&mut self, path: DavPath, status: StatusCode) {
        self.items.push((path, status));
    }

    /// Nothing failed so far.
    pub(crate) fn all_ok(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Has a failure been recorded for a path at or below `path`.
    pub(crate) fn has_failed_under(&self, path: &DavPath) -> bool {
        self.failures().any(|p| path.is_ancestor_or_self(p))
    }

    /// Paths for which a failure was recorded.
    pub(crate) fn failures(&self) -> impl Iterator<Item = &DavPath> {
        self.items
            .iter()
            .filter(|(_, s)| !s.is_success())
            .map(|(p, _)| p)
    }

    /// Build the response.
    ///
    /// No failures means the whole operation succeeded with `status`.
    /// A single failure of the request path itself is sent as a plain status.
    pub(crate) fn into_response(self, req_path: &DavPath, status: StatusCode) -> DavResult<Response<Body>> {
        let failed: Vec<&(DavPath, StatusCode)> =
            self.items.iter().filter(|(_, s)| !s.is_success()).collect();
        let single = match failed.as_slice() {
            [] => Some(status),
            [(p, s)] if p == req_path => Some(*s),
            _ => None,
        };
        if let Some(status) = single {
            let mut res = Response::new(Body::empty());
            *res.status_mut() = status;
            return Ok(res);
        }
        let responses: Vec<Element> = self
            .items
            .iter()
            .map(|(p, s)| status_response(p, *s))
            .collect();
        multistatus_response(&responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    async fn body_string(body: Body) -> String {
        let mut v = Vec::new();
        futures_util::pin_mut!(body);
        while let Some(b) = body.next().await {
            v.extend_from_slice(&b.unwrap());
        }
        String::from_utf8(v).unwrap()
    }

    #[tokio::test]
    async fn single_status_collapses() {
        let p = DavPath::new("/a").unwrap();
        let mut ms = MultiStatus::new();
        ms.add(p.clone(), StatusCode::LOCKED);
        let res = ms.into_response(&p, StatusCode::NO_CONTENT).unwrap();
        assert_eq!(res.status(), StatusCode::LOCKED);

        let res = MultiStatus::new()
            .into_response(&p, StatusCode::NO_CONTENT)
            .unwrap();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);

        // successes alone never make a 207.
        let mut ms = MultiStatus::new();
        ms.add(DavPath::new("/a/b").unwrap(), StatusCode::CREATED);
        assert!(ms.all_ok());
        let res = ms.into_response(&p, StatusCode::CREATED).unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn sub_path_gives_207() {
        let p = DavPath::new("/a/").unwrap();
        let mut ms = MultiStatus::new();
        ms.add(DavPath::new("/a/locked.txt").unwrap(), StatusCode::LOCKED);
        assert!(ms.has_failed_under(&p));
        let res = ms.into_response(&p, StatusCode::NO_CONTENT).unwrap();
        assert_eq!(res.status(), StatusCode::MULTI_STATUS);
        let body = body_string(res.into_body()).await;
        let doc = Element::parse2(body.as_bytes()).unwrap();
        assert!(doc.is_dav("multistatus"));
        let r = doc.child_elems_iter().next().unwrap();
        assert_eq!(r.get_child("href").unwrap().get_text().unwrap(), "/a/locked.txt");
        assert_eq!(
            r.get_child("status").unwrap().get_text().unwrap(),
            "HTTP/1.1 423 Locked"
        );
    }

    #[test]
    fn propstat_groups_by_status() {
        let p = DavPath::new("/f").unwrap();
        let r = propstat_response(
            &p,
            vec![
                (StatusCode::OK, Element::new_text("D:getcontentlength", "3")),
                (StatusCode::NOT_FOUND, Element::new2("D:nope")),
                (StatusCode::OK, Element::new_text("D:getetag", "\"x\"")),
            ],
        );
        let ps: Vec<&Element> = r
            .child_elems_iter()
            .filter(|e| e.name == "propstat")
            .collect();
        assert_eq!(ps.len(), 2);
        assert_eq!(ps[0].get_child("prop").unwrap().child_elems_iter().count(), 2);
    }
}
