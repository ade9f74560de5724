use heapless::String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    BufferOverflow,
    InteriorNul,
    ControlCharacter,
}

// Copies `s` into a bounded string the way it would be stored in a C buffer of
// `N + 1` bytes: newlines and surrounding blanks are trimmed, the content must
// leave room for the terminator and may not contain NUL or control characters.
pub fn write_trimmed_field<const N: usize>(s: &str) -> Result<String<N>, Error> {
    let trimmed = s.trim_matches(|c: char| c == '\n' || c == '\r').trim();

    if trimmed.len() > N {
        return Err(Error::BufferOverflow);
    }
    if trimmed.contains('\0') {
        return Err(Error::InteriorNul);
    }
    if trimmed.chars().any(char::is_control) {
        return Err(Error::ControlCharacter);
    }

    let mut field = String::new();
    field.push_str(trimmed).map_err(|_| Error::BufferOverflow)?;
    Ok(field)
}

// Same checks, applied to a value that is already bounded.
pub fn check_field(s: &str) -> Result<(), Error> {
    if s.contains('\0') {
        return Err(Error::InteriorNul);
    }
    if s.chars().any(char::is_control) {
        return Err(Error::ControlCharacter);
    }
    if s.trim() != s {
        return Err(Error::ControlCharacter);
    }
    Ok(())
}
