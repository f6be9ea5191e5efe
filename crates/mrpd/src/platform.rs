//! Linux implementation of the switch services.
//!
//! Ports are interfaces enslaved to a Linux bridge. MRP frames are sent and
//! received on per-port `AF_PACKET` sockets. Port blocking, FDB flushes and
//! bridge queries go through route netlink.

use crate::config::Config;
use crate::messages::{
    BR_STATE_BLOCKING, BR_STATE_FORWARDING, LinkMessage, PortNla, RouteMessage, port_vlan_info,
};
use crate::netlink::RtnlSocket;
use mrp::hal::{
    AceId, AclHal, AclRule, AfiId, BridgeHal, Clock, FdbHal, HealthHal, MepStatus, PacketIo,
    PortControl, PortVlanInfo,
};
use mrp::pdu::FrameClass;
use mrp::types::{MRP_ETHERTYPE, MepKey};
use mrp::{AclBackend, HalError, HalResult, MacAddr, Platform, PortInfo, PortNo, PortTable};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::BTreeMap;
use std::io::{self, ErrorKind};
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Receive timeout, bounds how long a receive thread takes to notice shutdown
pub const RX_POLL: Duration = Duration::from_millis(100);

/// Largest frame read from a port socket
pub const RX_BUF_LEN: usize = 1536;

const SYSFS_NET: &str = "/sys/class/net";

fn sysfs_path(ifname: &str, attr: &str) -> PathBuf {
    PathBuf::from(SYSFS_NET).join(ifname).join(attr)
}

/// Port number to interface name mapping, port `n` is entry `n - 1`
#[derive(Debug, Clone)]
pub struct Interfaces {
    names: Arc<Vec<String>>,
}

impl Interfaces {
    pub fn new(names: Vec<String>) -> Self {
        Self {
            names: Arc::new(names),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (PortNo, &str)> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, name)| (i as PortNo + 1, name.as_str()))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Raw `AF_PACKET` socket receiving and sending MRP frames on one interface
pub struct PortSocket {
    socket: Socket,
    ifindex: u32,
    interface: String,
}

impl PortSocket {
    /// Open a socket bound to `interface` and join the MRP multicast groups
    pub fn new(interface: &str) -> io::Result<Self> {
        let ifindex = get_interface_index(interface)?;
        let protocol = MRP_ETHERTYPE.to_be();

        let socket = Socket::new(
            Domain::PACKET,
            Type::RAW,
            Some(Protocol::from(protocol as i32)),
        )?;
        socket.set_read_timeout(Some(RX_POLL))?;

        let fd = socket.as_raw_fd();

        // SAFETY: all-zero is a valid sockaddr_ll
        let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as libc::c_ushort;
        addr.sll_protocol = protocol;
        addr.sll_ifindex = ifindex as libc::c_int;

        unsafe {
            if libc::bind(
                fd,
                &addr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            ) < 0
            {
                return Err(io::Error::last_os_error());
            }
        }

        let sock = Self {
            socket,
            ifindex,
            interface: interface.to_string(),
        };
        for class in FrameClass::ALL {
            sock.membership(libc::PACKET_ADD_MEMBERSHIP, class.dmac())?;
        }

        debug!(interface, ifindex, "MRP socket open");
        Ok(sock)
    }

    fn membership(&self, op: libc::c_int, mac: MacAddr) -> io::Result<()> {
        let mut address = [0u8; 8];
        address[..6].copy_from_slice(&mac.0);
        let mreq = libc::packet_mreq {
            mr_ifindex: self.ifindex as libc::c_int,
            mr_type: libc::PACKET_MR_MULTICAST as libc::c_ushort,
            mr_alen: 6,
            mr_address: address,
        };

        unsafe {
            if libc::setsockopt(
                self.socket.as_raw_fd(),
                libc::SOL_PACKET,
                op,
                &mreq as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::packet_mreq>() as libc::socklen_t,
            ) < 0
            {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn ifindex(&self) -> u32 {
        self.ifindex
    }

    /// Send one complete Ethernet frame
    pub fn send(&self, frame: &[u8]) -> io::Result<usize> {
        self.socket.send(frame)
    }

    /// Receive one frame into `buf`.
    ///
    /// Returns `None` on timeout and for frames this host sent itself.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        // SAFETY: all-zero is a valid sockaddr_ll
        let mut from: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        let mut from_len = std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;

        let len = unsafe {
            libc::recvfrom(
                self.socket.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
                &mut from as *mut _ as *mut libc::sockaddr,
                &mut from_len,
            )
        };

        if len < 0 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted => Ok(None),
                _ => Err(err),
            };
        }
        if from.sll_pkttype == libc::PACKET_OUTGOING {
            return Ok(None);
        }
        Ok(Some(len as usize))
    }
}

impl Drop for PortSocket {
    fn drop(&mut self) {
        for class in FrameClass::ALL {
            let _ = self.membership(libc::PACKET_DROP_MEMBERSHIP, class.dmac());
        }
    }
}

/// Get the interface index for a given interface name
fn get_interface_index(name: &str) -> io::Result<u32> {
    nix::net::if_::if_nametoindex(name).map_err(|e| {
        io::Error::new(
            ErrorKind::NotFound,
            format!("Interface {} not found: {}", name, e),
        )
    })
}

/// Read the MAC address of an interface
pub fn read_mac(ifname: &str) -> io::Result<MacAddr> {
    let text = std::fs::read_to_string(sysfs_path(ifname, "address"))?;
    text.parse()
        .map_err(|e: String| io::Error::new(ErrorKind::InvalidData, e))
}

/// Parse a sysfs boolean attribute ("0" / "1")
pub fn parse_sysfs_flag(text: &str) -> Option<bool> {
    match text.trim() {
        "0" => Some(false),
        "1" => Some(true),
        _ => None,
    }
}

/// Carrier state of an interface. Reading the attribute of an
/// administratively down interface fails, which counts as no carrier.
pub fn read_carrier(ifname: &str) -> bool {
    std::fs::read_to_string(sysfs_path(ifname, "carrier"))
        .ok()
        .and_then(|s| parse_sysfs_flag(&s))
        .unwrap_or(false)
}

/// Microseconds of `CLOCK_MONOTONIC`
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now_us(&self) -> u64 {
        // SAFETY: all-zero is a valid timespec
        let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
        unsafe {
            libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
        }
        ts.tv_sec as u64 * 1_000_000 + ts.tv_nsec as u64 / 1_000
    }
}

/// Frame transmission on the port sockets
pub struct SocketIo {
    sockets: BTreeMap<PortNo, Arc<PortSocket>>,
}

impl SocketIo {
    pub fn new(sockets: BTreeMap<PortNo, Arc<PortSocket>>) -> Self {
        Self { sockets }
    }
}

impl PacketIo for SocketIo {
    fn transmit(&mut self, port: PortNo, frame: &[u8]) -> HalResult<()> {
        let socket = self
            .sockets
            .get(&port)
            .ok_or_else(|| HalError::NotFound(format!("socket of port {}", port)))?;
        socket
            .send(frame)
            .map(|_| ())
            .map_err(|e| HalError::failed(format!("{}: {}", socket.interface(), e)))
    }

    fn afi_start(&mut self, _port: PortNo, _frame: &[u8], _interval_us: u64) -> HalResult<AfiId> {
        Err(HalError::Unsupported("periodic frame injection"))
    }

    fn afi_stop(&mut self, _id: AfiId) -> HalResult<()> {
        Err(HalError::Unsupported("periodic frame injection"))
    }
}

#[derive(Debug, Default)]
struct AclTable {
    rules: BTreeMap<AceId, AclRule>,
    next_id: AceId,
}

/// Access-control list kept in memory and applied on the receive path
#[derive(Debug, Clone, Default)]
pub struct SoftAcl {
    table: Arc<Mutex<AclTable>>,
}

impl SoftAcl {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, AclTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether a frame received on `port` goes to the engine. Frames no
    /// rule matches are delivered.
    pub fn admits(&self, port: PortNo, frame: &[u8]) -> bool {
        let Some(dmac) = frame.get(..6) else {
            return false;
        };
        let table = self.table();
        let mut matching = table
            .rules
            .values()
            .filter(|r| r.dmac.0 == dmac && r.ingress.contains(&port))
            .peekable();

        if matching.peek().is_none() {
            return true;
        }
        matching.any(|r| r.cpu_copy)
    }

    pub fn len(&self) -> usize {
        self.table().rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AclHal for SoftAcl {
    fn set(&mut self, id: Option<AceId>, rule: &AclRule) -> HalResult<AceId> {
        let mut table = self.table();
        let id = match id {
            Some(id) if table.rules.contains_key(&id) => id,
            Some(id) => return Err(HalError::NotFound(format!("ACE {}", id))),
            None => {
                table.next_id += 1;
                table.next_id
            }
        };
        table.rules.insert(id, rule.clone());
        Ok(id)
    }

    fn del(&mut self, id: AceId) -> HalResult<()> {
        self.table()
            .rules
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| HalError::NotFound(format!("ACE {}", id)))
    }

    fn get(&self, id: AceId) -> HalResult<AclRule> {
        self.table()
            .rules
            .get(&id)
            .cloned()
            .ok_or_else(|| HalError::NotFound(format!("ACE {}", id)))
    }
}

/// Route netlink socket shared by the bridge services
#[derive(Clone)]
pub struct SharedRtnl(Arc<Mutex<RtnlSocket>>);

impl SharedRtnl {
    pub fn new(socket: RtnlSocket) -> Self {
        Self(Arc::new(Mutex::new(socket)))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RtnlSocket> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Interface index of every port
#[derive(Debug, Clone, Default)]
pub struct PortIndexes(Arc<BTreeMap<PortNo, u32>>);

impl PortIndexes {
    pub fn new(indexes: BTreeMap<PortNo, u32>) -> Self {
        Self(Arc::new(indexes))
    }

    pub fn get(&self, port: PortNo) -> HalResult<u32> {
        self.0
            .get(&port)
            .copied()
            .ok_or_else(|| HalError::NotFound(format!("interface of port {}", port)))
    }
}

/// Bridge port attributes applied when a port starts or stops forwarding
pub fn port_state_request(ifindex: u32, forwarding: bool) -> RouteMessage {
    let state = if forwarding {
        BR_STATE_FORWARDING
    } else {
        BR_STATE_BLOCKING
    };
    RouteMessage::SetLink(LinkMessage::set_port(ifindex, vec![PortNla::State(state)]))
}

/// Request removing the learned FDB entries of a port
pub fn fdb_flush_request(ifindex: u32) -> RouteMessage {
    RouteMessage::SetLink(LinkMessage::set_port(ifindex, vec![PortNla::Flush]))
}

/// Bridge port states and FDB of the Linux bridge
#[derive(Clone)]
pub struct LinuxPorts {
    indexes: PortIndexes,
    rtnl: SharedRtnl,
}

impl LinuxPorts {
    pub fn new(indexes: PortIndexes, rtnl: SharedRtnl) -> Self {
        Self { indexes, rtnl }
    }
}

impl PortControl for LinuxPorts {
    fn set_forwarding(&mut self, port: PortNo, forwarding: bool) -> HalResult<()> {
        let ifindex = self.indexes.get(port)?;
        self.rtnl
            .lock()
            .request(port_state_request(ifindex, forwarding))
            .map_err(|e| HalError::failed(format!("port {} state: {}", port, e)))?;
        debug!(port, ifindex, forwarding, "Bridge port state set");
        Ok(())
    }
}

impl FdbHal for LinuxPorts {
    fn flush(&mut self, ports: &[PortNo]) -> HalResult<()> {
        let mut rtnl = self.rtnl.lock();
        for port in ports {
            let ifindex = self.indexes.get(*port)?;
            rtnl.request(fdb_flush_request(ifindex))
                .map_err(|e| HalError::failed(format!("port {} FDB flush: {}", port, e)))?;
        }
        Ok(())
    }
}

/// Health monitoring is not available on this host
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHealth;

impl HealthHal for NoHealth {
    fn status(&self, _key: &MepKey) -> HalResult<MepStatus> {
        Err(HalError::Unsupported("MEP health monitoring"))
    }
}

/// Bridge configuration read through route netlink
#[derive(Clone)]
pub struct LinuxBridge {
    bridge_index: u32,
    indexes: PortIndexes,
    rtnl: SharedRtnl,
}

impl LinuxBridge {
    pub fn new(bridge_index: u32, indexes: PortIndexes, rtnl: SharedRtnl) -> Self {
        Self {
            bridge_index,
            indexes,
            rtnl,
        }
    }
}

impl BridgeHal for LinuxBridge {
    fn port_vlan(&self, port: PortNo) -> HalResult<PortVlanInfo> {
        let ifindex = self.indexes.get(port)?;
        let links = self
            .rtnl
            .lock()
            .dump_links(RouteMessage::GetLink(LinkMessage::dump_port_vlans()))
            .map_err(|e| HalError::failed(format!("port {} VLAN query: {}", port, e)))?;

        let entries = links
            .iter()
            .find(|link| link.index == ifindex)
            .and_then(|link| link.vlans())
            .unwrap_or_default();
        Ok(port_vlan_info(&entries))
    }

    fn stp_enabled(&self, _port: PortNo) -> HalResult<bool> {
        let link = self
            .rtnl
            .lock()
            .get_link(RouteMessage::GetLink(LinkMessage::get(self.bridge_index)))
            .map_err(|e| HalError::failed(format!("bridge STP query: {}", e)))?;
        Ok(link.stp_state().is_some_and(|state| state != 0))
    }
}

/// The bridge and its ports as the engine sees them
pub struct LinuxSwitch {
    pub interfaces: Interfaces,
    pub node_mac: MacAddr,
    pub sockets: BTreeMap<PortNo, Arc<PortSocket>>,
    pub acl: SoftAcl,
    bridge_index: u32,
    indexes: PortIndexes,
    rtnl: SharedRtnl,
    port_macs: BTreeMap<PortNo, MacAddr>,
}

impl LinuxSwitch {
    /// Open sockets on every configured port and read the addresses
    pub fn open(config: &Config) -> common::Result<Self> {
        let interfaces = Interfaces::new(config.ports.clone());
        let bridge_index = get_interface_index(&config.node.bridge)?;
        let node_mac = match config.node_mac() {
            Some(mac) => mac,
            None => read_mac(&config.node.bridge)?,
        };

        let mut sockets = BTreeMap::new();
        let mut port_macs = BTreeMap::new();
        let mut indexes = BTreeMap::new();
        for (port, ifname) in interfaces.iter() {
            let socket = PortSocket::new(ifname)?;
            port_macs.insert(port, read_mac(ifname)?);
            indexes.insert(port, socket.ifindex());
            sockets.insert(port, Arc::new(socket));
        }
        let rtnl = SharedRtnl::new(RtnlSocket::new()?);

        info!(
            bridge = %config.node.bridge,
            node = %node_mac,
            ports = interfaces.len(),
            "Linux bridge opened"
        );
        if interfaces.is_empty() {
            warn!("No ports configured");
        }

        Ok(Self {
            interfaces,
            node_mac,
            sockets,
            acl: SoftAcl::new(),
            bridge_index,
            indexes: PortIndexes::new(indexes),
            rtnl,
            port_macs,
        })
    }

    pub fn port_table(&self) -> PortTable {
        PortTable::new(
            self.port_macs
                .iter()
                .map(|(port, mac)| (*port, PortInfo::new(*mac))),
        )
    }

    pub fn platform(&self, clock: Arc<dyn Clock>) -> Platform {
        let ports = LinuxPorts::new(self.indexes.clone(), self.rtnl.clone());
        Platform {
            clock,
            backend: Box::new(AclBackend::new(self.acl.clone(), ports.clone())),
            io: Box::new(SocketIo::new(self.sockets.clone())),
            fdb: Box::new(ports),
            health: Box::new(NoHealth),
            bridge: Box::new(LinuxBridge::new(
                self.bridge_index,
                self.indexes.clone(),
                self.rtnl.clone(),
            )),
        }
    }
}
