//! # Percent-encoding
//! src/http/url.rs
//!
//! Codificación de nombres de archivo para URLs y para `Content-Disposition`.
//!
//! - `encode`: deja pasar `[A-Za-z0-9._~-]` y convierte todo otro byte a `%XX`
//!   (hexadecimal en mayúsculas).
//! - `decode`: invierte lo anterior, trata `+` como espacio y deja pasar
//!   literalmente cualquier secuencia `%` malformada.

/// Codifica un string byte a byte
///
/// # Ejemplo
/// ```
/// use file_server::http::url;
///
/// assert_eq!(url::encode("informe 2024.txt"), "informe%202024.txt");
/// assert_eq!(url::encode("año"), "a%C3%B1o");
/// ```
pub fn encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len() * 3);

    for &byte in input.as_bytes() {
        if is_unreserved(byte) {
            out.push(byte as char);
        } else {
            out.push('%');
            out.push(HEX_UPPER[(byte >> 4) as usize] as char);
            out.push(HEX_UPPER[(byte & 0x0F) as usize] as char);
        }
    }

    out
}

/// Decodifica a bytes crudos
///
/// Nunca falla: `%G1` o un `%4` al final del string se copian tal cual.
pub fn decode_bytes(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hi = bytes.get(i + 1).copied().and_then(hex_value);
                let lo = bytes.get(i + 2).copied().and_then(hex_value);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi << 4) | lo);
                        i += 3;
                    }
                    _ => {
                        // Secuencia malformada: el '%' pasa literal y seguimos
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }

    out
}

/// Decodifica a `String` interpretando el resultado como UTF-8
///
/// # Ejemplo
/// ```
/// use file_server::http::url;
///
/// assert_eq!(url::decode("a%C3%B1o+nuevo"), "año nuevo");
/// assert_eq!(url::decode("100%"), "100%");
/// ```
pub fn decode(input: &str) -> String {
    match String::from_utf8(decode_bytes(input)) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

const HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~')
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
