//! keepalived configuration compiler.
//!
//! Turns a VRRP instance and a list of resolved virtual servers into the
//! keepalived configuration grammar. Compilation is total: everything it
//! consumes has been validated or resolved already, and identical input
//! always renders identical bytes.

use ipvs::{LVS_METHOD_DR, PERSISTENCE_TIMEOUT_SECS, RealServer, VirtualServer};
use std::path::PathBuf;
use vrrp::VRRPConfig;

/// Port probed by the per-real-server TCP health check.
pub const HEALTH_CHECK_PORT: u16 = 80;

/// Connect timeout of the TCP health check (seconds).
pub const HEALTH_CHECK_TIMEOUT_SECS: u32 = 3;

/// Interval between health check rounds (seconds).
pub const DELAY_LOOP_SECS: u32 = 5;

/// Process-wide keepalived settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalDefs {
    /// FIFO keepalived reports state changes to.
    pub notify_fifo: Option<PathBuf>,
}

/// Indented line writer for keepalived's brace-delimited blocks.
struct Writer {
    out: String,
    depth: usize,
}

impl Writer {
    fn new() -> Self {
        Self {
            out: String::with_capacity(1024),
            depth: 0,
        }
    }

    fn line(&mut self, text: impl AsRef<str>) {
        for _ in 0..self.depth {
            self.out.push_str("    ");
        }
        self.out.push_str(text.as_ref());
        self.out.push('\n');
    }

    fn open(&mut self, header: impl AsRef<str>) {
        self.line(format!("{} {{", header.as_ref()));
        self.depth += 1;
    }

    fn close(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        self.line("}");
    }

    fn blank(&mut self) {
        self.out.push('\n');
    }

    /// A block whose body is one item per line.
    fn list<T: ToString>(&mut self, header: &str, items: &[T]) {
        self.open(header);
        for item in items {
            self.line(item.to_string());
        }
        self.close();
    }

    fn finish(self) -> String {
        self.out
    }
}

/// Render the full keepalived configuration.
pub fn compile(global: &GlobalDefs, instance: &VRRPConfig, servers: &[VirtualServer]) -> String {
    let mut w = Writer::new();

    if let Some(fifo) = &global.notify_fifo {
        w.open("global_defs");
        w.line(format!("notify_fifo {}", fifo.display()));
        w.close();
        w.blank();
    }

    write_instance(&mut w, instance);

    for vs in servers {
        w.blank();
        write_virtual_server(&mut w, vs);
    }

    w.finish()
}

fn write_instance(w: &mut Writer, instance: &VRRPConfig) {
    w.open(format!("vrrp_instance {}", instance.instance));
    // Mastership is only ever won through the election.
    w.line("state BACKUP");
    w.line(format!("interface {}", instance.interface));
    w.line(format!("virtual_router_id {}", instance.vrid));
    w.line(format!("priority {}", instance.priority));
    w.line(format!("advert_int {}", instance.advert_interval_secs()));
    w.line("nopreempt");
    w.list("track_interface", std::slice::from_ref(&instance.interface));

    if let Some(unicast) = &instance.unicast {
        w.line(format!("unicast_src_ip {}", unicast.source));
        w.list("unicast_peer", &unicast.peers);
    }

    w.list("virtual_ipaddress", &instance.virtual_ips);
    w.close();
}

fn write_virtual_server(w: &mut Writer, vs: &VirtualServer) {
    w.open(format!("virtual_server fwmark {}", vs.fwmark));
    w.line(format!("delay_loop {}", DELAY_LOOP_SECS));
    w.line(format!("lvs_sched {}", vs.scheduler));
    w.line(format!("lvs_method {}", LVS_METHOD_DR));
    w.line(format!("persistence_timeout {}", PERSISTENCE_TIMEOUT_SECS));
    w.line(format!("protocol {}", vs.protocol));

    for rs in &vs.real_servers {
        w.blank();
        write_real_server(w, rs);
    }

    w.close();
}

fn write_real_server(w: &mut Writer, rs: &RealServer) {
    w.open(format!("real_server {} {}", rs.address, rs.port));
    w.line(format!("weight {}", rs.weight));
    w.open("TCP_CHECK");
    w.line(format!("connect_port {}", HEALTH_CHECK_PORT));
    w.line(format!("connect_timeout {}", HEALTH_CHECK_TIMEOUT_SECS));
    w.close();
    w.close();
}
