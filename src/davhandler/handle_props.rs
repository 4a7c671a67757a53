use futures_util::StreamExt;
use http::{Request, Response, StatusCode};
use xmltree::Element;

use crate::body::Body;
use crate::conditional::if_match_get_tokens;
use crate::davheaders::Depth;
use crate::errors::{fserror_to_status, properror_to_status, DavError};
use crate::multistatus::{multistatus_response, propstat_response, status_response};
use crate::props::{LiveContext, PatchOp, PropRequest};
use crate::walk::{walk, WalkOrder};
use crate::xmltree_ext::{ElementExt, DAV_NS};
use crate::DavResult;

// `<D:propfind>`: allprop (with include), propname, or prop.
fn parse_propfind(xmldata: &[u8]) -> DavResult<PropRequest> {
    let tree = Element::parse2(xmldata)?;
    if !tree.is_dav("propfind") {
        return Err(DavError::XmlParseError);
    }

    let mut req = None;
    let mut include = Vec::new();
    for elem in tree.child_elems_into_iter() {
        if elem.ns() != DAV_NS {
            continue;
        }
        let name = elem.name.clone();
        match name.as_str() {
            "allprop" => req = Some(PropRequest::AllProp(Vec::new())),
            "propname" => req = Some(PropRequest::PropName),
            "prop" => req = Some(PropRequest::Prop(elem.child_elems_into_iter().collect())),
            "include" => include = elem.child_elems_into_iter().collect(),
            _ => {}
        }
    }
    match req {
        Some(PropRequest::AllProp(_)) => Ok(PropRequest::AllProp(include)),
        Some(req) => Ok(req),
        None => Err(DavError::XmlParseError),
    }
}

// `<D:propertyupdate>`: set and remove, in document order.
fn parse_propertyupdate(xmldata: &[u8]) -> DavResult<Vec<PatchOp>> {
    let tree = Element::parse2(xmldata)?;
    if !tree.is_dav("propertyupdate") {
        return Err(DavError::XmlParseError);
    }

    let mut ops = Vec::new();
    for elem in tree.child_elems_into_iter() {
        let set = match (elem.is_dav("set"), elem.is_dav("remove")) {
            (true, _) => true,
            (_, true) => false,
            _ => continue,
        };
        for prop in elem.child_elems_into_iter().filter(|e| e.is_dav("prop")) {
            for p in prop.child_elems_into_iter() {
                ops.push(PatchOp { set, prop: p });
            }
        }
    }
    if ops.is_empty() {
        return Err(DavError::XmlParseError);
    }
    Ok(ops)
}

impl crate::DavHandler {
    pub(crate) async fn handle_propfind(
        &self,
        req: &Request<()>,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        let path = self.path(req)?;
        let depth = match self.depth(req, Depth::Infinity)? {
            Depth::Zero => Some(0),
            Depth::One => Some(1),
            Depth::Infinity => None,
        };
        let preq = if xmldata.is_empty() {
            PropRequest::AllProp(Vec::new())
        } else {
            parse_propfind(xmldata)?
        };
        trace!("propfind {} depth {:?}: {:?}", path, depth, preq);

        let meta = self.fs.metadata(&path).await?;
        let strm = walk(&*self.fs, &path, meta, depth, WalkOrder::PreOrder);
        futures_util::pin_mut!(strm);

        let mut responses = Vec::new();
        while let Some(item) = strm.next().await {
            match item {
                Ok(item) => {
                    let locks = self.ls.discover(&item.path);
                    let ctx = LiveContext {
                        path: &item.path,
                        meta: &*item.meta,
                        locks: &locks,
                    };
                    match self.props.get_properties(&ctx, &preq) {
                        Ok(props) => responses.push(propstat_response(&item.path, props)),
                        Err(e) => {
                            debug!("propfind {}: {}", item.path, e);
                            responses.push(status_response(&item.path, properror_to_status(&e)));
                        }
                    }
                }
                Err((p, e)) => responses.push(status_response(&p, fserror_to_status(&e))),
            }
        }
        multistatus_response(&responses)
    }

    pub(crate) async fn handle_proppatch(
        &self,
        req: &Request<()>,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        let mut path = self.path(req)?;
        let meta = self.fs.metadata(&path).await?;
        path.add_slash_if(meta.is_dir());

        let tokens = if_match_get_tokens(req, Some(&*meta), &*self.fs, &*self.ls, &path).await?;
        self.check_locked(&path, &tokens)?;

        let ops = parse_propertyupdate(xmldata)?;
        let res = self.props.patch_properties(&path, ops)?;
        if res.iter().any(|(s, _)| *s != StatusCode::OK) {
            debug!("proppatch {}: refused", path);
        }
        multistatus_response(&[propstat_response(&path, res)])
    }
}
