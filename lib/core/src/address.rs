use v2x_wire::ethernet::Address;
use v2x_wire::packet::Port;

/// A (physical address, port) pair. Port 0 is reserved for broadcast/gateway use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolAddress {
    pub physical: Address,
    pub port: Port,
}

impl ProtocolAddress {
    pub fn new(physical: Address, port: Port) -> ProtocolAddress {
        ProtocolAddress { physical, port }
    }
}
