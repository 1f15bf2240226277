use thiserror::Error;

/// Faults detected while matching bridge replies against the packets that produced them.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ResponseError {
    /// The transport delivered a different number of bytes than the packet reserved.
    #[error("packet reserved {expected} response bytes, transport delivered {received}")]
    LengthMismatch {
        /// Number of bytes reserved by the packet.
        expected: usize,
        /// Number of bytes delivered by the transport.
        received: usize,
    },
    /// A response slot points past the end of the received data.
    #[error("response slot at {offset} needs {needed} bytes, only {len} received")]
    Truncated {
        /// Offset recorded when the operation was appended.
        offset: usize,
        /// Number of bytes the interpreter needs at that offset.
        needed: usize,
        /// Number of bytes actually available.
        len: usize,
    },
    /// A status notification was too short to hold the fixed status block.
    #[error("status notification of {0} bytes is shorter than the status block")]
    MalformedStatus(usize),
}

/// One wire communication error type.
#[derive(Debug, Error)]
pub enum OneWireError<E> {
    /// Encapsulates the error type from the underlying transport.
    #[error("transport fault: {0:?}")]
    Transport(E),
    /// The bridge reply did not match what the packet reserved.
    #[error(transparent)]
    Response(#[from] ResponseError),
    /// Indicates that no device is present on the bus.
    #[error("no device present on the bus")]
    NoDevicePresent,
    /// Indicates that the bus is held by another session.
    #[error("bus is held by another session")]
    BusInUse,
    /// Indicates that a short circuit was detected on the bus.
    #[error("short circuit detected on the bus")]
    ShortCircuit,
    /// Indicates that the operation is not supported by the bridge.
    #[error("operation not supported by this bridge")]
    Unimplemented,
    /// Computed CRC of the ROM is invalid.
    #[error("ROM code failed CRC validation")]
    InvalidRomCrc,
    /// A 12V program pulse was requested but the bridge reported no program voltage.
    #[error("program voltage is not available on this bridge")]
    ProgramVoltageUnavailable,
}
