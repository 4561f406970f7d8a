use smol_str::SmolStr;

/// `attalign` of `pg_attribute`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Align {
    Char,
    Short,
    Int,
    Double,
}

impl Align {
    #[inline]
    pub fn bytes(self) -> usize {
        match self {
            Align::Char => 1,
            Align::Short => 2,
            Align::Int => 4,
            Align::Double => 8,
        }
    }

    /// Round `off` up to this alignment (`att_align_nominal`).
    #[inline]
    pub fn align(self, off: usize) -> usize {
        let mask = self.bytes() - 1;
        (off + mask) & !mask
    }
}

impl From<u8> for Align {
    /// Unknown codes fall back to char alignment, like the catalog default.
    fn from(code: u8) -> Self {
        match code as char {
            's' => Align::Short,
            'i' => Align::Int,
            'd' => Align::Double,
            _ => Align::Char,
        }
    }
}

/// Varlena length marker in `attlen`.
pub const ATTLEN_VARLENA: i16 = -1;
/// Null-terminated C string marker in `attlen`.
pub const ATTLEN_CSTRING: i16 = -2;

/// Attribute metadata the walkers need, taken from `pg_attribute`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttrMeta {
    pub name: SmolStr,
    pub attlen: i16,
    pub attbyval: bool,
    pub attalign: Align,
}

impl AttrMeta {
    pub fn fixed(name: &str, attlen: i16, attalign: Align) -> Self {
        Self {
            name: SmolStr::new(name),
            attlen,
            attbyval: matches!(attlen, 1 | 2 | 4 | 8),
            attalign,
        }
    }

    pub fn varlena(name: &str, attalign: Align) -> Self {
        Self {
            name: SmolStr::new(name),
            attlen: ATTLEN_VARLENA,
            attbyval: false,
            attalign,
        }
    }

    pub fn cstring(name: &str) -> Self {
        Self {
            name: SmolStr::new(name),
            attlen: ATTLEN_CSTRING,
            attbyval: false,
            attalign: Align::Char,
        }
    }

    #[inline]
    pub fn is_varlena(&self) -> bool {
        !self.attbyval && self.attlen == ATTLEN_VARLENA
    }

    #[inline]
    pub fn is_cstring(&self) -> bool {
        !self.attbyval && self.attlen == ATTLEN_CSTRING
    }

    /// `att_align_pointer`: a varlena whose first byte is not a pad byte
    /// carries a short header and is stored unaligned.
    pub fn align_pointer(&self, off: usize, first_byte: Option<u8>) -> usize {
        if self.attlen == ATTLEN_VARLENA && matches!(first_byte, Some(b) if b != 0) {
            return off;
        }
        self.attalign.align(off)
    }
}

/// Tuple descriptor of a relation: its attributes in `attnum` order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TupleDesc {
    attrs: Vec<AttrMeta>,
}

impl TupleDesc {
    pub fn new(attrs: Vec<AttrMeta>) -> Self {
        Self { attrs }
    }

    #[inline]
    pub fn natts(&self) -> usize {
        self.attrs.len()
    }

    #[inline]
    pub fn attr(&self, i: usize) -> Option<&AttrMeta> {
        self.attrs.get(i)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttrMeta> {
        self.attrs.iter()
    }
}

impl FromIterator<AttrMeta> for TupleDesc {
    fn from_iter<I: IntoIterator<Item = AttrMeta>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nominal_alignment() {
        assert_eq!(Align::Int.align(25), 28);
        assert_eq!(Align::Double.align(25), 32);
        assert_eq!(Align::Short.align(24), 24);
        assert_eq!(Align::Char.align(25), 25);
        assert_eq!(Align::from(b'd'), Align::Double);
        assert_eq!(Align::from(b'x'), Align::Char);
    }

    #[test]
    fn short_varlena_is_not_aligned() {
        let text = AttrMeta::varlena("t", Align::Int);
        assert_eq!(text.align_pointer(25, Some(0x0B)), 25);
        assert_eq!(text.align_pointer(25, Some(0)), 28);
        let int = AttrMeta::fixed("i", 4, Align::Int);
        assert_eq!(int.align_pointer(25, Some(0x0B)), 28);
    }
}
