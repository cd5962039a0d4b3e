//! Capture filter compilation
//!
//! Link captures only need to see LISP return traffic for one NAT-rewritten
//! port, selected with an expression of the form
//! `udp dst port <ephemeral> and udp src port 4341`. [`PortMatchCompiler`]
//! turns that shape into a classic BPF program for Ethernet framing that
//! matches UDP over IPv6 and over IPv4 (non-first fragments never match).
//!
//! The program is opaque to everything except the capture handle that
//! attaches it.

use crate::error::CaptureError;

// Classic BPF opcodes
const BPF_LD_H_ABS: u16 = 0x28;
const BPF_LD_B_ABS: u16 = 0x30;
const BPF_LD_H_IND: u16 = 0x48;
const BPF_LDX_B_MSH: u16 = 0xb1;
const BPF_JEQ_K: u16 = 0x15;
const BPF_JSET_K: u16 = 0x45;
const BPF_RET_K: u16 = 0x06;

const ETHERTYPE_IPV4: u32 = 0x0800;
const ETHERTYPE_IPV6: u32 = 0x86dd;
const IPPROTO_UDP: u32 = 17;

// Ethernet frame offsets
const OFF_ETHERTYPE: u32 = 12;
const OFF_IPV4: u32 = 14;
const OFF_IPV4_FRAG: u32 = OFF_IPV4 + 6;
const OFF_IPV4_PROTO: u32 = OFF_IPV4 + 9;
const OFF_IPV6_NEXT: u32 = 14 + 6;
const OFF_IPV6_UDP: u32 = 14 + 40;

/// Default number of bytes kept per accepted frame
pub const DEFAULT_SNAPLEN: u32 = 65535;

/// One classic BPF instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BpfInsn {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

/// A compiled capture filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterProgram {
    expression: String,
    insns: Vec<BpfInsn>,
}

impl FilterProgram {
    /// Expression this program was compiled from
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Instructions, for attaching to a socket
    #[must_use]
    pub fn instructions(&self) -> &[BpfInsn] {
        &self.insns
    }

    /// Number of instructions
    #[must_use]
    pub fn len(&self) -> usize {
        self.insns.len()
    }

    /// Whether the program has no instructions
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }
}

/// Compiles filter expressions into attachable programs
pub trait FilterCompiler: Send + Sync {
    /// Compile `expression`
    ///
    /// # Errors
    ///
    /// Returns `CaptureError::FilterCompile` if the expression is not supported.
    fn compile(&self, expression: &str) -> Result<FilterProgram, CaptureError>;
}

/// Expression used for NAT return traffic to `ephemeral_port`
#[must_use]
pub fn nat_port_expression(ephemeral_port: u16, tunnel_port: u16) -> String {
    format!("udp dst port {ephemeral_port} and udp src port {tunnel_port}")
}

/// Ports a UDP port-match expression selects on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortMatch {
    pub dst: Option<u16>,
    pub src: Option<u16>,
}

impl PortMatch {
    /// Parse `udp dst port N [and udp src port M]` in either clause order
    ///
    /// # Errors
    ///
    /// Returns `CaptureError::FilterCompile` for anything else.
    pub fn parse(expression: &str) -> Result<Self, CaptureError> {
        let tokens: Vec<&str> = expression.split_whitespace().collect();
        let mut matched = Self::default();

        for (i, clause) in tokens.split(|t| *t == "and").enumerate() {
            let [proto, dir, kw, port] = clause else {
                return Err(CaptureError::filter_compile(
                    expression,
                    format!("clause {} is not `udp <dst|src> port <n>`", i + 1),
                ));
            };
            if *proto != "udp" || *kw != "port" {
                return Err(CaptureError::filter_compile(
                    expression,
                    format!("unsupported clause `{}`", clause.join(" ")),
                ));
            }
            let port: u16 = port.parse().map_err(|_| {
                CaptureError::filter_compile(expression, format!("invalid port `{port}`"))
            })?;
            let slot = match *dir {
                "dst" => &mut matched.dst,
                "src" => &mut matched.src,
                other => {
                    return Err(CaptureError::filter_compile(
                        expression,
                        format!("unsupported direction `{other}`"),
                    ))
                }
            };
            if slot.replace(port).is_some() {
                return Err(CaptureError::filter_compile(
                    expression,
                    format!("duplicate `{dir}` clause"),
                ));
            }
        }

        if matched.dst.is_none() && matched.src.is_none() {
            return Err(CaptureError::filter_compile(expression, "empty expression"));
        }
        Ok(matched)
    }
}

#[derive(Debug, Clone, Copy)]
enum Label {
    Next,
    Ipv4,
    Accept,
    Reject,
}

/// Two-pass builder resolving symbolic jump targets to relative offsets
#[derive(Default)]
struct ProgramBuilder {
    ops: Vec<(u16, Label, Label, u32)>,
    ipv4_at: usize,
}

impl ProgramBuilder {
    fn stmt(&mut self, code: u16, k: u32) {
        self.ops.push((code, Label::Next, Label::Next, k));
    }

    fn jump(&mut self, code: u16, k: u32, jt: Label, jf: Label) {
        self.ops.push((code, jt, jf, k));
    }

    fn mark_ipv4(&mut self) {
        self.ipv4_at = self.ops.len();
    }

    fn finish(mut self, snaplen: u32) -> Result<Vec<BpfInsn>, String> {
        self.stmt(BPF_RET_K, snaplen);
        self.stmt(BPF_RET_K, 0);

        let len = self.ops.len();
        let resolve = |at: usize, label: Label| -> Result<u8, String> {
            let target = match label {
                Label::Next => at + 1,
                Label::Ipv4 => self.ipv4_at,
                Label::Accept => len - 2,
                Label::Reject => len - 1,
            };
            u8::try_from(target - at - 1).map_err(|_| "jump out of range".to_string())
        };

        self.ops
            .iter()
            .enumerate()
            .map(|(at, &(code, jt, jf, k))| {
                let is_jump = code & 0x07 == 0x05;
                Ok(BpfInsn {
                    code,
                    jt: if is_jump { resolve(at, jt)? } else { 0 },
                    jf: if is_jump { resolve(at, jf)? } else { 0 },
                    k,
                })
            })
            .collect()
    }
}

/// Compiles UDP port-match expressions to Ethernet classic BPF
#[derive(Debug, Clone)]
pub struct PortMatchCompiler {
    snaplen: u32,
}

impl Default for PortMatchCompiler {
    fn default() -> Self {
        Self::new(DEFAULT_SNAPLEN)
    }
}

impl PortMatchCompiler {
    /// Create a compiler whose programs keep `snaplen` bytes per frame
    #[must_use]
    pub const fn new(snaplen: u32) -> Self {
        Self { snaplen }
    }

    fn emit_ports(b: &mut ProgramBuilder, ports: PortMatch, indirect: bool, base: u32) {
        let load = if indirect { BPF_LD_H_IND } else { BPF_LD_H_ABS };
        let checks = [(2, ports.dst), (0, ports.src)];
        let last = checks.iter().rposition(|(_, p)| p.is_some());

        for (i, (off, port)) in checks.iter().enumerate() {
            let Some(port) = port else { continue };
            let on_match = if Some(i) == last { Label::Accept } else { Label::Next };
            b.stmt(load, base + off);
            b.jump(BPF_JEQ_K, u32::from(*port), on_match, Label::Reject);
        }
    }
}

impl FilterCompiler for PortMatchCompiler {
    fn compile(&self, expression: &str) -> Result<FilterProgram, CaptureError> {
        let ports = PortMatch::parse(expression)?;
        let mut b = ProgramBuilder::default();

        b.stmt(BPF_LD_H_ABS, OFF_ETHERTYPE);
        b.jump(BPF_JEQ_K, ETHERTYPE_IPV6, Label::Next, Label::Ipv4);

        // IPv6, UDP directly after the fixed header
        b.stmt(BPF_LD_B_ABS, OFF_IPV6_NEXT);
        b.jump(BPF_JEQ_K, IPPROTO_UDP, Label::Next, Label::Reject);
        Self::emit_ports(&mut b, ports, false, OFF_IPV6_UDP);

        // IPv4, skip fragments, X = header length
        b.mark_ipv4();
        b.jump(BPF_JEQ_K, ETHERTYPE_IPV4, Label::Next, Label::Reject);
        b.stmt(BPF_LD_B_ABS, OFF_IPV4_PROTO);
        b.jump(BPF_JEQ_K, IPPROTO_UDP, Label::Next, Label::Reject);
        b.stmt(BPF_LD_H_ABS, OFF_IPV4_FRAG);
        b.jump(BPF_JSET_K, 0x1fff, Label::Reject, Label::Next);
        b.stmt(BPF_LDX_B_MSH, OFF_IPV4);
        Self::emit_ports(&mut b, ports, true, OFF_IPV4);

        let insns = b
            .finish(self.snaplen)
            .map_err(|reason| CaptureError::filter_compile(expression, reason))?;

        Ok(FilterProgram {
            expression: expression.to_string(),
            insns,
        })
    }
}
