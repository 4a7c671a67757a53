use std::borrow::Cow;
use std::io::{Read, Write};

use xml::writer::EventWriter;
use xml::writer::XmlEvent as XmlWEvent;
use xml::EmitterConfig;
use xmltree::{Element, XMLNode};

use crate::{DavError, DavResult};

pub(crate) const DAV_NS: &str = "DAV:";

pub(crate) trait ElementExt {
    /// Builder: "D:name" gets the DAV: namespace.
    fn new2<'a, N: Into<&'a str>>(n: N) -> Self;
    /// Builder.
    fn new_text<'a, N: Into<&'a str>, T: Into<String>>(n: N, t: T) -> Self;
    /// Like parse, but returns DavError.
    fn parse2<R: Read>(r: R) -> DavResult<Element>;
    /// Add a child element.
    fn push_element(&mut self, e: Element);
    /// Iterator over the children that are Elements.
    fn child_elems_iter<'a>(&'a self) -> Box<dyn Iterator<Item = &'a Element> + 'a>;
    /// Vec of the children that are Elements.
    fn child_elems_into_iter(self) -> std::vec::IntoIter<Element>;
    /// Is this DAV:<name>.
    fn is_dav(&self, name: &str) -> bool;
    /// Namespace, empty string if there is none.
    fn ns(&self) -> &str;
    /// Copy of the element without children, for "propname" style answers.
    fn name_only(&self) -> Element;
    /// Write the element using an EventWriter.
    fn write_ev<W: Write>(&self, emitter: &mut EventWriter<W>) -> Result<(), xml::writer::Error>;
    /// Serialize a standalone fragment (no xml declaration).
    fn to_fragment(&self) -> DavResult<Vec<u8>>;
    /// Serialize as a complete document.
    fn to_document(&self) -> DavResult<Vec<u8>>;
}

impl ElementExt for Element {
    fn new2<'a, N: Into<&'a str>>(n: N) -> Element {
        let v: Vec<&str> = n.into().splitn(2, ':').collect();
        if v.len() == 1 {
            Element::new(v[0])
        } else {
            let mut e = Element::new(v[1]);
            e.prefix = Some(v[0].to_string());
            if v[0] == "D" {
                e.namespace = Some(DAV_NS.to_string());
            }
            e
        }
    }

    fn new_text<'a, N: Into<&'a str>, S: Into<String>>(n: N, t: S) -> Element {
        let mut e = Element::new2(n);
        e.children.push(XMLNode::Text(t.into()));
        e
    }

    fn parse2<R: Read>(r: R) -> Result<Element, DavError> {
        let res = Element::parse(r);
        match res {
            Ok(elems) => Ok(elems),
            Err(xmltree::ParseError::MalformedXml(_)) => Err(DavError::XmlParseError),
            Err(_) => Err(DavError::XmlReadError),
        }
    }

    fn push_element(&mut self, e: Element) {
        self.children.push(XMLNode::Element(e));
    }

    fn child_elems_iter<'a>(&'a self) -> Box<dyn Iterator<Item = &'a Element> + 'a> {
        Box::new(self.children.iter().filter_map(|n| match n {
            XMLNode::Element(e) => Some(e),
            _ => None,
        }))
    }

    fn child_elems_into_iter(self) -> std::vec::IntoIter<Element> {
        self.children
            .into_iter()
            .filter_map(|n| match n {
                XMLNode::Element(e) => Some(e),
                _ => None,
            })
            .collect::<Vec<_>>()
            .into_iter()
    }

    fn is_dav(&self, name: &str) -> bool {
        self.name == name && self.namespace.as_deref() == Some(DAV_NS)
    }

    fn ns(&self) -> &str {
        self.namespace.as_deref().unwrap_or("")
    }

    fn name_only(&self) -> Element {
        let mut e = Element::new(&self.name);
        e.prefix = self.prefix.clone();
        e.namespace = self.namespace.clone();
        e
    }

    fn write_ev<W: Write>(&self, emitter: &mut EventWriter<W>) -> Result<(), xml::writer::Error> {
        // "D" is declared on the multistatus/prop document element.
        write_elem(self, emitter, true)
    }

    fn to_fragment(&self) -> DavResult<Vec<u8>> {
        serialize(self, false)
    }

    fn to_document(&self) -> DavResult<Vec<u8>> {
        serialize(self, true)
    }
}

fn serialize(elem: &Element, declaration: bool) -> DavResult<Vec<u8>> {
    let mut buf = Vec::new();
    {
        let mut emitter = EventWriter::new_with_config(
            &mut buf,
            EmitterConfig::new()
                .write_document_declaration(declaration)
                .perform_indent(false),
        );
        write_elem(elem, &mut emitter, false)?;
    }
    Ok(buf)
}

fn write_elem<W: Write>(
    elem: &Element,
    emitter: &mut EventWriter<W>,
    dav_declared: bool,
) -> Result<(), xml::writer::Error> {
    let name: Cow<str> = match elem.prefix {
        Some(ref p) => Cow::Owned(format!("{}:{}", p, elem.name)),
        None => Cow::Borrowed(&elem.name),
    };
    let mut dav_declared = dav_declared;
    let mut start = XmlWEvent::start_element(name.as_ref());
    if let Some(ref ns) = elem.namespace {
        match elem.prefix {
            Some(ref p) if p == "D" && ns == DAV_NS => {
                if !dav_declared {
                    start = start.ns("D", DAV_NS);
                    dav_declared = true;
                }
            }
            Some(ref p) => start = start.ns(p.as_str(), ns.as_str()),
            None => start = start.default_ns(ns.as_str()),
        }
    }
    for (k, v) in &elem.attributes {
        start = start.attr(k.as_str(), v.as_str());
    }
    emitter.write(start)?;
    for node in &elem.children {
        match node {
            XMLNode::Element(e) => write_elem(e, emitter, dav_declared)?,
            XMLNode::Text(t) => emitter.write(XmlWEvent::characters(t))?,
            XMLNode::CData(t) => emitter.write(XmlWEvent::cdata(t))?,
            _ => {}
        }
    }
    emitter.write(XmlWEvent::end_element())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new2_sets_dav_namespace() {
        let e = Element::new2("D:prop");
        assert_eq!(e.name, "prop");
        assert!(e.is_dav("prop"));
        let e = Element::new2("plain");
        assert_eq!(e.ns(), "");
    }

    #[test]
    fn fragment_roundtrip_keeps_namespace() {
        let src = r#"<Z:author xmlns:Z="urn:example"><Z:name>Ann</Z:name></Z:author>"#;
        let e = Element::parse2(src.as_bytes()).unwrap();
        let bytes = e.to_fragment().unwrap();
        let back = Element::parse2(&bytes[..]).unwrap();
        assert_eq!(back.name, "author");
        assert_eq!(back.ns(), "urn:example");
        let child = back.child_elems_iter().next().unwrap();
        assert_eq!(child.get_text().unwrap(), "Ann");
    }

    #[test]
    fn fragment_declares_dav_prefix() {
        let e = Element::new_text("D:displayname", "Report");
        let bytes = e.to_fragment().unwrap();
        let back = Element::parse2(&bytes[..]).unwrap();
        assert!(back.is_dav("displayname"));
    }

    #[test]
    fn document_has_declaration() {
        let mut e = Element::new2("D:prop");
        e.push_element(Element::new2("D:lockdiscovery"));
        let s = String::from_utf8(e.to_document().unwrap()).unwrap();
        assert!(s.starts_with("<?xml"));
        assert!(s.contains(r#"<D:prop xmlns:D="DAV:">"#));
    }

    #[test]
    fn malformed_xml_is_an_error() {
        assert!(Element::parse2(&b"<a><b></a>"[..]).is_err());
    }
}
