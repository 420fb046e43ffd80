use super::Error;

pub fn u32_from_le(data: &[u8]) -> Result<u32, Error> {
    if data.len() != 4 {
        return Err(Error::transport(
            "Invalid slice length provided to u32_from_le",
        ));
    }
    let bytes = data[0..4]
        .try_into()
        .map_err(|_| Error::transport("Couldn't convert from bytes to u32"))?;
    Ok(u32::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_little_endian_words() {
        assert_eq!(u32_from_le(&[0x00, 0x00, 0x02, 0x10]).unwrap(), 0x1002_0000);
        assert!(u32_from_le(&[0x01, 0x02]).is_err());
    }
}
