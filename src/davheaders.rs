use std::fmt;

use headers::Header;
use http::header::{HeaderName, HeaderValue};

lazy_static! {
    static ref DEPTH: HeaderName = HeaderName::from_static("depth");
    static ref TIMEOUT: HeaderName = HeaderName::from_static("timeout");
    static ref OVERWRITE: HeaderName = HeaderName::from_static("overwrite");
    static ref DESTINATION: HeaderName = HeaderName::from_static("destination");
    static ref LOCK_TOKEN: HeaderName = HeaderName::from_static("lock-token");
    static ref IF: HeaderName = HeaderName::from_static("if");
}

// helper: exactly one header value, as a trimmed str.
fn one<'i, I>(values: &mut I) -> Result<&'i str, headers::Error>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    let v = values.next().ok_or_else(headers::Error::invalid)?;
    if values.next().is_some() {
        return Err(headers::Error::invalid());
    }
    v.to_str()
        .map(|s| s.trim())
        .map_err(|_| headers::Error::invalid())
}

fn encode_str<E: Extend<HeaderValue>>(s: &str, values: &mut E) {
    if let Ok(v) = HeaderValue::from_str(s) {
        values.extend(std::iter::once(v));
    }
}

/// Depth: header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

impl Header for Depth {
    fn name() -> &'static HeaderName {
        &DEPTH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        match one(values)? {
            "0" => Ok(Depth::Zero),
            "1" => Ok(Depth::One),
            s if s.eq_ignore_ascii_case("infinity") => Ok(Depth::Infinity),
            _ => Err(headers::Error::invalid()),
        }
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let value = match *self {
            Depth::Zero => "0",
            Depth::One => "1",
            Depth::Infinity => "infinity",
        };
        values.extend(std::iter::once(HeaderValue::from_static(value)));
    }
}

/// One candidate of the Timeout: header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DavTimeout {
    Seconds(u32),
    Infinite,
}

/// Timeout: header, a list of candidates in order of preference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeout(pub Vec<DavTimeout>);

impl Header for Timeout {
    fn name() -> &'static HeaderName {
        &TIMEOUT
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let mut v = Vec::new();
        for value in values {
            let value = value.to_str().map_err(|_| headers::Error::invalid())?;
            for word in value.split(',').map(|w| w.trim()).filter(|w| !w.is_empty()) {
                if word.eq_ignore_ascii_case("infinite") {
                    v.push(DavTimeout::Infinite);
                    continue;
                }
                let secs = word
                    .get(..7)
                    .filter(|p| p.eq_ignore_ascii_case("second-"))
                    .and_then(|_| word[7..].parse::<u64>().ok())
                    .ok_or_else(headers::Error::invalid)?;
                v.push(DavTimeout::Seconds(secs.min(u32::MAX as u64) as u32));
            }
        }
        if v.is_empty() {
            return Err(headers::Error::invalid());
        }
        Ok(Timeout(v))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let value = self
            .0
            .iter()
            .map(|t| match t {
                DavTimeout::Seconds(n) => format!("Second-{n}"),
                DavTimeout::Infinite => "Infinite".to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        encode_str(&value, values);
    }
}

/// Destination: header, unparsed (absolute URI or absolute path).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination(pub String);

impl Header for Destination {
    fn name() -> &'static HeaderName {
        &DESTINATION
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let s = one(values)?;
        if s.is_empty() {
            return Err(headers::Error::invalid());
        }
        Ok(Destination(s.to_string()))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        encode_str(&self.0, values);
    }
}

/// Overwrite: header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Overwrite(pub bool);

impl Header for Overwrite {
    fn name() -> &'static HeaderName {
        &OVERWRITE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        match one(values)? {
            "T" | "t" => Ok(Overwrite(true)),
            "F" | "f" => Ok(Overwrite(false)),
            _ => Err(headers::Error::invalid()),
        }
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let value = if self.0 { "T" } else { "F" };
        values.extend(std::iter::once(HeaderValue::from_static(value)));
    }
}

/// Lock-Token: header. The token is stored without the angle brackets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(pub String);

impl Header for LockToken {
    fn name() -> &'static HeaderName {
        &LOCK_TOKEN
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let s = one(values)?;
        let t = s
            .strip_prefix('<')
            .and_then(|s| s.strip_suffix('>'))
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(headers::Error::invalid)?;
        Ok(LockToken(t.to_string()))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        encode_str(&format!("<{}>", self.0), values);
    }
}

/// One condition inside an If: list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IfItem {
    StateToken(String),
    ETag(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfCondition {
    pub not: bool,
    pub item: IfItem,
}

/// One parenthesized list, with the resource it applies to (if tagged).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfList {
    pub resource_tag: Option<String>,
    pub conditions: Vec<IfCondition>,
}

/// If: header. Conditions inside a list are AND-ed, lists are OR-ed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct If(pub Vec<IfList>);

impl If {
    /// All state tokens mentioned in the header, negated or not.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.0.iter().flat_map(|l| {
            l.conditions.iter().filter_map(|c| match c.item {
                IfItem::StateToken(ref t) => Some(t.as_str()),
                IfItem::ETag(_) => None,
            })
        })
    }
}

impl fmt::Display for If {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut tag: Option<&str> = None;
        for (i, list) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            if list.resource_tag.as_deref() != tag {
                if let Some(ref t) = list.resource_tag {
                    write!(f, "<{t}> ")?;
                }
                tag = list.resource_tag.as_deref();
            }
            f.write_str("(")?;
            for (j, c) in list.conditions.iter().enumerate() {
                if j > 0 {
                    f.write_str(" ")?;
                }
                if c.not {
                    f.write_str("Not ")?;
                }
                match c.item {
                    IfItem::StateToken(ref t) => write!(f, "<{t}>")?,
                    IfItem::ETag(ref t) => write!(f, "[{t}]")?,
                }
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}

// parse the inside of one "( ... )" list. Returns the conditions and
// the rest of the input after the closing ")".
fn parse_if_list(mut s: &str) -> Option<(Vec<IfCondition>, &str)> {
    let mut conditions = Vec::new();
    loop {
        s = s.trim_start();
        if let Some(rest) = s.strip_prefix(')') {
            if conditions.is_empty() {
                return None;
            }
            return Some((conditions, rest));
        }
        let mut not = false;
        if s.get(..3).map(|w| w.eq_ignore_ascii_case("not")) == Some(true) {
            not = true;
            s = s[3..].trim_start();
        }
        let item = if let Some(rest) = s.strip_prefix('<') {
            let end = rest.find('>')?;
            s = &rest[end + 1..];
            IfItem::StateToken(rest[..end].trim().to_string())
        } else if let Some(rest) = s.strip_prefix('[') {
            let end = rest.find(']')?;
            s = &rest[end + 1..];
            IfItem::ETag(rest[..end].trim().to_string())
        } else {
            return None;
        };
        conditions.push(IfCondition { not, item });
    }
}

fn parse_if(mut s: &str) -> Option<Vec<IfList>> {
    let mut lists = Vec::new();
    let mut tag: Option<String> = None;
    loop {
        s = s.trim_start();
        if s.is_empty() {
            break;
        }
        if let Some(rest) = s.strip_prefix('<') {
            let end = rest.find('>')?;
            tag = Some(rest[..end].trim().to_string());
            s = rest[end + 1..].trim_start();
            if !s.starts_with('(') {
                return None;
            }
            continue;
        }
        let rest = s.strip_prefix('(')?;
        let (conditions, rest) = parse_if_list(rest)?;
        lists.push(IfList {
            resource_tag: tag.clone(),
            conditions,
        });
        s = rest;
    }
    if lists.is_empty() {
        return None;
    }
    Some(lists)
}

impl Header for If {
    fn name() -> &'static HeaderName {
        &IF
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let mut lists = Vec::new();
        for value in values {
            let value = value.to_str().map_err(|_| headers::Error::invalid())?;
            lists.extend(parse_if(value).ok_or_else(headers::Error::invalid)?);
        }
        if lists.is_empty() {
            return Err(headers::Error::invalid());
        }
        Ok(If(lists))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        encode_str(&self.to_string(), values);
    }
}
