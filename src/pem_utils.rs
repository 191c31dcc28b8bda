use crate::error::{Error, Result};

/// Convert DER‑encoded data into a PEM‑encoded string with the provided label.
pub fn der_to_pem(der: &[u8], label: &str) -> String {
    let pem = pem::Pem::new(label, der);
    pem::encode_config(&pem, pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF))
}

/// Convert a PEM‑encoded string to DER‑encoded bytes, checking the block label.
pub fn pem_to_der(pem_str: &str, label: &str) -> Result<Vec<u8>> {
    let pem = pem::parse(pem_str).map_err(|e| Error::Decoding(e.to_string()))?;
    if pem.tag() != label {
        return Err(Error::Decoding(format!(
            "expected a {label} PEM block, found {}",
            pem.tag()
        )));
    }
    Ok(pem.contents().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_mismatch_is_rejected() {
        let pem = der_to_pem(&[0x30, 0x00], "CERTIFICATE");
        assert_eq!(pem_to_der(&pem, "CERTIFICATE").unwrap(), vec![0x30, 0x00]);
        assert!(matches!(pem_to_der(&pem, "PRIVATE KEY"), Err(Error::Decoding(_))));
    }
}
