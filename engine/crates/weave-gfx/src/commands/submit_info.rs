use crate::queue::QueueDomain;

/// 一次提交的凭证
///
/// 对应某个 queue domain 上 timeline semaphore 的 signal 值。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GfxSubmitTicket {
    pub domain: QueueDomain,
    pub value: u64,
}
impl GfxSubmitTicket {
    #[inline]
    pub fn new(domain: QueueDomain, value: u64) -> Self {
        Self { domain, value }
    }
}

/// 每个 domain 只保留最大的 ticket
pub fn latest_per_domain(tickets: &[GfxSubmitTicket]) -> Vec<GfxSubmitTicket> {
    let mut latest: Vec<GfxSubmitTicket> = Vec::with_capacity(QueueDomain::ALL.len());
    for ticket in tickets {
        match latest.iter_mut().find(|t| t.domain == ticket.domain) {
            Some(existing) => existing.value = existing.value.max(ticket.value),
            None => latest.push(*ticket),
        }
    }
    latest.sort();
    latest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_per_domain_keeps_max() {
        let tickets = [
            GfxSubmitTicket::new(QueueDomain::Compute, 3),
            GfxSubmitTicket::new(QueueDomain::Graphics, 7),
            GfxSubmitTicket::new(QueueDomain::Compute, 5),
        ];
        assert_eq!(
            latest_per_domain(&tickets),
            vec![GfxSubmitTicket::new(QueueDomain::Graphics, 7), GfxSubmitTicket::new(QueueDomain::Compute, 5)]
        );
    }
}
