//! Canonical team and venue names.
//!
//! Data sources, tipping sites and eras disagree about what to call a club or a ground.
//! `NameTables` holds the translations as immutable maps; components borrow it rather
//! than reaching for globals. Lookups never fail: an unknown name comes back as given,
//! so a new ground or an unusual spelling flows through the pipeline untouched.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

const TEAM_TRANSLATIONS: &[(&str, &str)] = &[
    ("Tigers", "Richmond"),
    ("Blues", "Carlton"),
    ("Demons", "Melbourne"),
    ("Giants", "GWS"),
    ("GWS Giants", "GWS"),
    ("Greater Western Sydney", "GWS"),
    ("Suns", "Gold Coast"),
    ("Bombers", "Essendon"),
    ("Swans", "Sydney"),
    ("Magpies", "Collingwood"),
    ("Kangaroos", "North Melbourne"),
    ("Crows", "Adelaide"),
    ("Bulldogs", "Western Bulldogs"),
    ("Footscray", "Western Bulldogs"),
    ("Dockers", "Fremantle"),
    ("Power", "Port Adelaide"),
    ("Saints", "St Kilda"),
    ("Eagles", "West Coast"),
    ("Lions", "Brisbane"),
    ("Cats", "Geelong"),
    ("Hawks", "Hawthorn"),
    ("Adelaide Crows", "Adelaide"),
    ("Brisbane Lions", "Brisbane"),
    ("Brisbane Bears", "Brisbane"),
    ("Gold Coast Suns", "Gold Coast"),
    ("Geelong Cats", "Geelong"),
    ("West Coast Eagles", "West Coast"),
    ("Sydney Swans", "Sydney"),
];

const DEFUNCT_TEAM_NAMES: &[&str] = &["Fitzroy", "University"];

// Footywire ground names (sponsor names included) mapped onto AFL Tables names.
const FOOTYWIRE_VENUE_TRANSLATIONS: &[(&str, &str)] = &[
    ("AAMI Stadium", "Football Park"),
    ("ANZ Stadium", "Stadium Australia"),
    ("UTAS Stadium", "York Park"),
    ("Blacktown International", "Blacktown"),
    ("Blundstone Arena", "Bellerive Oval"),
    ("Domain Stadium", "Subiaco"),
    ("Etihad Stadium", "Docklands"),
    ("Marvel Stadium", "Docklands"),
    ("GMHBA Stadium", "Kardinia Park"),
    ("MCG", "M.C.G."),
    ("Mars Stadium", "Eureka Stadium"),
    ("Metricon Stadium", "Carrara"),
    ("Optus Stadium", "Perth Stadium"),
    ("SCG", "S.C.G."),
    ("Spotless Stadium", "Sydney Showground"),
    ("TIO Stadium", "Marrara Oval"),
    ("Westpac Stadium", "Wellington"),
    ("Canberra Oval", "Manuka Oval"),
    ("TIO Traeger Park", "Traeger Park"),
    // footywire.com spells it 'Traegar' in its fixtures
    ("TIO Traegar Park", "Traeger Park"),
];

const VENUE_CITIES: &[(&str, &str)] = &[
    ("Football Park", "Adelaide"),
    ("S.C.G.", "Sydney"),
    ("Windy Hill", "Melbourne"),
    ("Subiaco", "Perth"),
    ("Moorabbin Oval", "Melbourne"),
    ("M.C.G.", "Melbourne"),
    ("Kardinia Park", "Geelong"),
    ("Victoria Park", "Melbourne"),
    ("Waverley Park", "Melbourne"),
    ("Princes Park", "Melbourne"),
    ("Western Oval", "Melbourne"),
    ("W.A.C.A.", "Perth"),
    ("Carrara", "Gold Coast"),
    ("Gabba", "Brisbane"),
    ("Docklands", "Melbourne"),
    ("York Park", "Launceston"),
    ("Manuka Oval", "Canberra"),
    ("Sydney Showground", "Sydney"),
    ("Adelaide Oval", "Adelaide"),
    ("Bellerive Oval", "Hobart"),
    ("Marrara Oval", "Darwin"),
    ("Traeger Park", "Alice Springs"),
    ("Perth Stadium", "Perth"),
    ("Stadium Australia", "Sydney"),
    ("Wellington", "Wellington"),
    ("Lake Oval", "Melbourne"),
    ("East Melbourne", "Melbourne"),
    ("Corio Oval", "Geelong"),
    ("Junction Oval", "Melbourne"),
    ("Brunswick St", "Melbourne"),
    ("Punt Rd", "Melbourne"),
    ("Glenferrie Oval", "Melbourne"),
    ("Arden St", "Melbourne"),
    ("Olympic Park", "Melbourne"),
    ("Yarraville Oval", "Melbourne"),
    ("Toorak Park", "Melbourne"),
    ("Euroa", "Euroa"),
    ("Coburg Oval", "Melbourne"),
    ("Brisbane Exhibition", "Brisbane"),
    ("North Hobart", "Hobart"),
    ("Bruce Stadium", "Canberra"),
    ("Yallourn", "Yallourn"),
    ("Cazaly's Stadium", "Cairns"),
    ("Eureka Stadium", "Ballarat"),
    ("Blacktown", "Sydney"),
    ("Jiangwan Stadium", "Shanghai"),
    ("Albury", "Albury"),
    ("Riverway Stadium", "Townsville"),
];

const FOOTY_TIPS_TEAM_NAMES: &[(&str, &str)] = &[
    ("Adelaide", "Adelaide Crows"),
    ("Brisbane", "Brisbane Lions"),
    ("Geelong", "Geelong Cats"),
    ("Gold Coast", "Gold Coast Suns"),
    ("GWS", "GWS Giants"),
    ("Sydney", "Sydney Swans"),
    ("West Coast", "West Coast Eagles"),
];

/// A tipping competition site with its own team naming convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TipSite {
    Monash,
    FootyTips,
}

/// Team and venue lists as exposed by the modeling service's `data_config` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    pub team_names: Vec<String>,
    pub defunct_team_names: Vec<String>,
    pub venues: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NameTables {
    teams: HashMap<String, String>,
    venues: HashMap<String, String>,
    venue_cities: HashMap<String, String>,
    footy_tips_teams: HashMap<String, String>,
    defunct_teams: Vec<String>,
}

impl Default for NameTables {
    fn default() -> Self {
        Self::builtin()
    }
}

impl NameTables {
    pub fn builtin() -> Self {
        Self {
            teams: to_map(TEAM_TRANSLATIONS),
            venues: to_map(FOOTYWIRE_VENUE_TRANSLATIONS),
            venue_cities: to_map(VENUE_CITIES),
            footy_tips_teams: to_map(FOOTY_TIPS_TEAM_NAMES),
            defunct_teams: DEFUNCT_TEAM_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn normalize_team<'a>(&'a self, name: &'a str) -> &'a str {
        self.teams.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn normalize_venue<'a>(&'a self, name: &'a str) -> &'a str {
        self.venues.get(name).map(String::as_str).unwrap_or(name)
    }

    /// City of a venue, accepting either naming convention.
    pub fn venue_city(&self, venue: &str) -> Option<&str> {
        self.venue_cities
            .get(self.normalize_venue(venue))
            .map(String::as_str)
    }

    /// Label a tipping site uses for a canonical team name.
    pub fn site_team_name<'a>(&'a self, site: TipSite, team: &'a str) -> &'a str {
        match site {
            TipSite::Monash => team,
            TipSite::FootyTips => self
                .footy_tips_teams
                .get(team)
                .map(String::as_str)
                .unwrap_or(team),
        }
    }

    /// Site label to canonical name, for scripts that read team names off a site.
    pub fn site_team_translations(&self, site: TipSite) -> BTreeMap<String, String> {
        match site {
            TipSite::Monash => BTreeMap::new(),
            TipSite::FootyTips => self
                .footy_tips_teams
                .iter()
                .map(|(canonical, label)| (label.clone(), canonical.clone()))
                .collect(),
        }
    }

    pub fn data_config(&self) -> DataConfig {
        let mut teams: BTreeSet<String> = self.teams.values().cloned().collect();
        teams.extend(self.defunct_teams.iter().cloned());
        let mut venues: Vec<String> = self.venue_cities.keys().cloned().collect();
        venues.sort();

        DataConfig {
            team_names: teams.into_iter().collect(),
            defunct_team_names: self.defunct_teams.clone(),
            venues,
        }
    }
}

fn to_map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(from, to)| (from.to_string(), to.to_string()))
        .collect()
}
