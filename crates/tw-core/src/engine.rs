//! Event engine
//!
//! [`Engine`] owns the Tab Registry, the pending link table, the compiled
//! configuration and the collaborators. It handles one [`HostEvent`] at a
//! time, to completion; wrap it in [`crate::actor::EngineHandle`] to feed it
//! from concurrent host callbacks in delivery order.

use crate::config::EngineConfig;
use crate::events::{
    EngineMessage, EngineReply, HostEvent, NavigationDetails, Notice, Outcome, RequestDetails, TabInfo,
    TargetDetails, UpgradeCounts,
};
use crate::links::PendingLinks;
use crate::pipeline::{gpc_setting, CheckContext, Phase, RequestInfo};
use crate::registry::TabRegistry;
use crate::services::{Services, SessionRule, SessionRuleKind, UpgradeCounter};
use crate::site::{FeatureFlags, SiteContext};
use crate::tab::TabDelta;
use crate::types::{BlockingResponse, Decision, TabId};

pub struct Engine {
    config: EngineConfig,
    services: Services,
    tabs: TabRegistry,
    links: PendingLinks,
}

impl Engine {
    /// Build an engine. In declarative host mode, session rules left over
    /// from a previous run are flushed.
    pub fn new(config: EngineConfig, services: Services) -> Self {
        let mut engine = Self {
            config,
            services,
            tabs: TabRegistry::new(),
            links: PendingLinks::new(),
        };
        engine.flush_session_rules();
        engine
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn tabs(&self) -> &TabRegistry {
        &self.tabs
    }

    pub fn links(&self) -> &PendingLinks {
        &self.links
    }

    pub fn upgrade_counts(&self) -> UpgradeCounts {
        UpgradeCounts {
            total_upgrades: self.services.counters.upgrade_count(UpgradeCounter::TotalUpgrades),
            failed_upgrades: self.services.counters.upgrade_count(UpgradeCounter::FailedUpgrades),
        }
    }

    /// Drop all tab state and pending links, and flush session rules.
    pub fn shutdown(&mut self) {
        log::info!("engine shutting down with {} tabs", self.tabs.len());
        self.tabs.clear();
        self.links.clear();
        self.flush_session_rules();
    }

    fn resolve(&self, url: &str) -> SiteContext {
        self.config.resolver.resolve(url, self.services.settings.as_ref())
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    pub fn handle_message(&mut self, message: EngineMessage) -> EngineReply {
        match message {
            EngineMessage::Event(event) => EngineReply::Outcome(self.handle_event(event)),
            EngineMessage::GetTab(tab_id) => EngineReply::Tab(self.tabs.snapshot(tab_id)),
            EngineMessage::ListTabs => EngineReply::Tabs(self.tabs.snapshots()),
            EngineMessage::UpgradeCounts => EngineReply::UpgradeCounts(self.upgrade_counts()),
            EngineMessage::SettingsLoaded(values) => {
                log::info!("settings loaded with {} keys", values.len());
                self.services.settings.load(values);
                EngineReply::Done
            }
            EngineMessage::UpdateSetting { key, value } => {
                EngineReply::Setting(self.services.settings.update_setting(&key, value))
            }
            EngineMessage::RemoveSetting { key } => EngineReply::Setting(self.services.settings.remove_setting(&key)),
            EngineMessage::AllowClickToLoad { tab_id, domain } => {
                self.allow_click_to_load(tab_id, domain);
                EngineReply::Done
            }
        }
    }

    pub fn handle_event(&mut self, event: HostEvent) -> Outcome {
        log::trace!("event for tab {}", event.tab_id());
        match event {
            HostEvent::TabCreated(info) | HostEvent::TabUpdated(info) => {
                self.upsert_tab(info);
                Outcome::default()
            }
            HostEvent::TabRemoved(removal) => {
                self.remove_tab(removal.tab_id);
                Outcome::default()
            }
            HostEvent::CreatedNavigationTarget(target) => {
                self.record_navigation_target(target);
                Outcome::default()
            }
            HostEvent::BeforeNavigate(nav) => self.before_navigate(nav),
            HostEvent::Committed(nav) => self.committed(nav),
            HostEvent::BeforeRequest(req) => self.run_phase(Phase::BeforeRequest, req),
            HostEvent::BeforeSendHeaders(req) => self.run_phase(Phase::BeforeSendHeaders, req),
            HostEvent::HeadersReceived(req) => self.run_phase(Phase::HeadersReceived, req),
            HostEvent::Completed(req) => self.run_phase(Phase::Completed, req),
            HostEvent::ErrorOccurred(req) => self.run_phase(Phase::ErrorOccurred, req),
        }
    }

    // =========================================================================
    // Tab Lifecycle
    // =========================================================================

    fn upsert_tab(&mut self, info: TabInfo) {
        if !info.id.is_tab() {
            return;
        }
        let url = info.url.unwrap_or_default();
        let site = || self.config.resolver.resolve(&url, self.services.settings.as_ref());
        self.tabs.create_or_update_tab(info.id, &url, info.status.as_deref(), site);
    }

    fn remove_tab(&mut self, tab_id: TabId) {
        if self.tabs.delete(tab_id).is_none() {
            log::debug!("removed unknown tab {tab_id}");
        }
        self.links.forget(tab_id);
        self.remove_session_rules(tab_id);
    }

    fn record_navigation_target(&mut self, target: TargetDetails) {
        if !target.tab_id.is_tab() || !target.source_tab_id.is_tab() {
            return;
        }
        self.links.record(target.tab_id, target.source_tab_id);
    }

    fn before_navigate(&mut self, nav: NavigationDetails) -> Outcome {
        if nav.frame_id != 0 || !nav.tab_id.is_tab() {
            return Outcome::default();
        }
        let tab_id = nav.tab_id;
        let now_ms = nav.time_stamp;

        let previous_ad_click = self.tabs.get(tab_id).and_then(|tab| tab.ad_click().cloned());
        self.remove_session_rules(tab_id);

        let site = self.resolve(&nav.url);
        let base_domain = site.base_domain.clone();
        let generation = self.tabs.create(tab_id, &nav.url, site, now_ms).generation();

        let mut ad_click = previous_ad_click.filter(|ad| ad.should_propagate_for_navigation(&base_domain, now_ms));

        if let Some(source_id) = self.links.take(tab_id) {
            match self.tabs.get(source_id).and_then(|source| source.ad_click()) {
                Some(source_ad) if source_ad.should_propagate_for_new_tab(&base_domain, now_ms) => {
                    log::debug!("propagating ad click from tab {source_id} to tab {tab_id}");
                    ad_click = Some(source_ad.propagate(tab_id));
                }
                Some(_) => log::debug!("ad click of tab {source_id} not propagated to tab {tab_id}"),
                None => {}
            }
        }

        if let Some(ad_click) = ad_click {
            if self.tabs.apply(tab_id, generation, TabDelta::SetAdClick(ad_click)) {
                self.sync_ad_click_rule(tab_id);
            }
        }

        match self.tabs.snapshot(tab_id) {
            Some(snapshot) => Outcome::notice(Notice::TabChanged(snapshot)),
            None => Outcome::default(),
        }
    }

    fn committed(&mut self, nav: NavigationDetails) -> Outcome {
        if nav.frame_id != 0 {
            return Outcome::default();
        }
        let Some(tab) = self.tabs.get(nav.tab_id) else {
            log::debug!("commit for unknown tab {}", nav.tab_id);
            return Outcome::default();
        };
        let site = tab.site();
        if site.special_domain_name.is_some() || !site.is_valid() {
            return Outcome::default();
        }
        if site.is_broken {
            log::debug!("{} is marked broken; click-to-load skipped", site.host);
            return Outcome::default();
        }
        if !site.is_feature_enabled(FeatureFlags::CLICK_TO_LOAD) {
            return Outcome::default();
        }
        Outcome::notice(Notice::ClickToLoadEligible {
            tab_id: nav.tab_id,
            domain: site.host.clone(),
        })
    }

    // =========================================================================
    // Request Phases
    // =========================================================================

    fn run_phase(&mut self, phase: Phase, mut details: RequestDetails) -> Outcome {
        let mut outcome = Outcome::default();
        let tab_id = details.tab_id;
        let request = RequestInfo::new(&details, self.tabs.get(tab_id), &self.config);
        let gpc_enabled = gpc_setting(self.services.settings.as_ref());

        for check in phase.checks() {
            let tab = self.tabs.get(tab_id);
            let generation = tab.map(|t| t.generation());
            let ctx = CheckContext {
                tab,
                config: &self.config,
                settings: self.services.settings.as_ref(),
                gpc_enabled,
                request: &request,
            };
            let output = (check.run)(&details, &ctx);

            if let Some(delta) = output.delta {
                let touches_ad_click = matches!(delta, TabDelta::SetAdClick(_) | TabDelta::FinalizeAdClick { .. });
                let changed = match generation {
                    Some(generation) => self.tabs.apply(tab_id, generation, delta),
                    None => false,
                };
                if changed {
                    if let Some(counter) = output.counter {
                        self.services.counters.increment_upgrade_count(counter);
                    }
                    if touches_ad_click {
                        self.sync_ad_click_rule(tab_id);
                    }
                }
            } else if let Some(counter) = output.counter {
                self.services.counters.increment_upgrade_count(counter);
            }
            outcome.notices.extend(output.notice);

            let blocked = merge_decision(&mut outcome.response, &mut details, phase, output.decision);
            if blocked {
                log::debug!("{} cancelled request {}", check.name, details.request_id);
                break;
            }
        }

        if !outcome.response.is_noop() {
            log::debug!("{:?} changed request {}", phase, details.request_id);
        }
        outcome
    }

    // =========================================================================
    // Session Rules
    // =========================================================================

    fn allow_click_to_load(&mut self, tab_id: TabId, domain: String) {
        if self.tabs.get(tab_id).is_none() {
            log::debug!("click-to-load for unknown tab {tab_id}");
            return;
        }
        self.add_session_rule(SessionRule {
            tab_id,
            kind: SessionRuleKind::ClickToLoad { domain },
        });
    }

    /// Install the allow rule of a tab's attribution once its advertiser is known.
    fn sync_ad_click_rule(&mut self, tab_id: TabId) {
        let rule = self
            .tabs
            .get(tab_id)
            .and_then(|tab| tab.ad_click())
            .and_then(|ad| ad.session_rule());
        if let Some(rule) = rule {
            self.add_session_rule(rule);
        }
    }

    fn add_session_rule(&mut self, rule: SessionRule) {
        if !self.config.host_mode.is_declarative() {
            return;
        }
        if let Err(err) = self.services.rules.add_tab_rule(rule) {
            log::warn!("failed to add session rule: {err}");
        }
    }

    fn remove_session_rules(&mut self, tab_id: TabId) {
        if !self.config.host_mode.is_declarative() {
            return;
        }
        if let Err(err) = self.services.rules.remove_tab_rules(tab_id) {
            log::warn!("failed to remove session rules of tab {tab_id}: {err}");
        }
    }

    fn flush_session_rules(&mut self) {
        if !self.config.host_mode.is_declarative() {
            return;
        }
        if let Err(err) = self.services.rules.flush() {
            log::warn!("failed to flush session rules: {err}");
        }
    }
}

/// Fold one check decision into the phase's response. Header edits are also
/// applied to `details` so later checks see them. Returns true on block.
fn merge_decision(
    response: &mut BlockingResponse,
    details: &mut RequestDetails,
    phase: Phase,
    decision: Decision,
) -> bool {
    match decision {
        Decision::NoOp => false,
        Decision::Block => {
            response.cancel = true;
            response.redirect_url = None;
            true
        }
        Decision::Redirect(url) => {
            response.redirect_url = Some(url);
            false
        }
        Decision::ModifyHeaders(delta) => {
            if phase.edits_request_headers() {
                let headers = details.request_headers.get_or_insert_with(Vec::new);
                delta.apply_to(headers);
                response.request_headers = Some(headers.clone());
            } else if phase.edits_response_headers() {
                let headers = details.response_headers.get_or_insert_with(Vec::new);
                delta.apply_to(headers);
                response.response_headers = Some(headers.clone());
            } else {
                log::warn!("header edit ignored in {phase:?} phase");
            }
            false
        }
    }
}
