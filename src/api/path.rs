use std::borrow::Cow;
use std::string::FromUtf8Error;

/// Percent-encode a filename for use as a single URL path segment.
///
/// Everything outside the unreserved set is escaped, so `/`, `?`, `#`, `%`
/// and spaces inside a filename can never change the shape of the path.
pub fn encode_filename(filename: &str) -> Cow<'_, str> {
    urlencoding::encode(filename)
}

/// Inverse of [`encode_filename`]
pub fn decode_filename(segment: &str) -> Result<Cow<'_, str>, FromUtf8Error> {
    urlencoding::decode(segment)
}

/// Join an endpoint prefix and a filename into a request path
pub fn filename_path(endpoint: &str, filename: &str) -> String {
    format!("{}/{}", endpoint, encode_filename(filename))
}
