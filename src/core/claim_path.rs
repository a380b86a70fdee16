use serde_json::{Map, Value as Json};

use super::dcql_query::DcqlCredentialClaimsQueryPath;

/// Resolves an exact claim path into a claim tree.
///
/// Object nodes are entered by key and array nodes by a non-negative index,
/// given either as an integer segment or a canonical decimal string (no sign,
/// no leading zeros). Anything else, a
/// missing key, an out-of-range index, or a `null` reached before the path is
/// exhausted yields `None`. The `null` wildcard segment is not an exact path
/// and never resolves.
pub fn resolve<'a>(root: &'a Json, path: &[DcqlCredentialClaimsQueryPath]) -> Option<&'a Json> {
    path.iter().try_fold(root, |node, segment| match (node, segment) {
        (Json::Object(object), DcqlCredentialClaimsQueryPath::String(key)) => object.get(key),
        (Json::Object(object), DcqlCredentialClaimsQueryPath::Integer(i)) => {
            object.get(&i.to_string())
        }
        (Json::Array(array), DcqlCredentialClaimsQueryPath::String(index)) => {
            array.get(parse_index(index)?)
        }
        (Json::Array(array), DcqlCredentialClaimsQueryPath::Integer(i)) => array.get(*i),
        _ => None,
    })
}

fn parse_index(segment: &str) -> Option<usize> {
    let digits = !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit());
    if !digits || (segment.len() > 1 && segment.starts_with('0')) {
        return None;
    }
    segment.parse().ok()
}

/// [`resolve`] starting from an object, such as a credential's claim set.
pub fn resolve_in<'a>(
    root: &'a Map<String, Json>,
    path: &[DcqlCredentialClaimsQueryPath],
) -> Option<&'a Json> {
    let (first, rest) = path.split_first()?;
    let node = match first {
        DcqlCredentialClaimsQueryPath::String(key) => root.get(key)?,
        DcqlCredentialClaimsQueryPath::Integer(i) => root.get(&i.to_string())?,
        DcqlCredentialClaimsQueryPath::Null => return None,
    };
    resolve(node, rest)
}

/// The segments of `path` as strings, the form used for disclosure locations.
pub fn path_to_strings(path: &[DcqlCredentialClaimsQueryPath]) -> Option<Vec<String>> {
    path.iter()
        .map(|segment| match segment {
            DcqlCredentialClaimsQueryPath::String(s) => Some(s.clone()),
            DcqlCredentialClaimsQueryPath::Integer(i) => Some(i.to_string()),
            DcqlCredentialClaimsQueryPath::Null => None,
        })
        .collect()
}
