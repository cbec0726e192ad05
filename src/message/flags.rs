use bitflags::bitflags;

bitflags! {
    /// Flags associated with a `Msg` frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MsgFlags: u8 {
        /// More message parts follow this one.
        const MORE = 0b01;
    }
}
