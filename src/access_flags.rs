use bitflags::bitflags;

bitflags! {
    /// Access flags on methods
    ///
    /// Only `STATIC` affects frame tracking (it decides whether slot 0 holds a receiver), but the
    /// full set is kept so that flags read from a class file can be passed through untouched.
    ///
    /// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.6-200-A.1
    pub struct MethodAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const BRIDGE = 0x0040;
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
    }
}

impl MethodAccessFlags {
    /// Does the method take an implicit receiver in local slot 0?
    pub fn has_receiver(&self) -> bool {
        !self.contains(MethodAccessFlags::STATIC)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn receiver_follows_static_flag() {
        assert!(MethodAccessFlags::PUBLIC.has_receiver());
        assert!(!(MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC).has_receiver());
        assert_eq!(MethodAccessFlags::from_bits(0x0009).map(|f| f.has_receiver()), Some(false));
    }
}
