//! Projection of a transformed lead onto the contact schema of the marketing API.
use serde::Serialize;
use serde_json::Value;

use crate::normalize::{
    date_only, is_truthy, last_10_digits, stringify, to_integer, to_true_false_string, to_yes_no,
    NULL,
};
use crate::transform::TransformedRecord;

/// Contact attributes as expected by the marketing API.
///
/// Text attributes default to an empty string and counters to 0. The transformed record the
/// payload was built from is kept for debugging but is never serialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OutboundPayload {
    #[serde(rename = "USER_ID")]
    pub user_id: String,
    #[serde(rename = "EMAIL")]
    pub email: String,
    #[serde(rename = "MOBILE")]
    pub mobile: String,
    #[serde(rename = "USER_SOURCE")]
    pub user_source: String,
    #[serde(rename = "FULL_NAME")]
    pub full_name: String,
    #[serde(rename = "USER_STATUS")]
    pub user_status: String,
    /// Literal "true" / "false", the API does not accept JSON booleans here.
    #[serde(rename = "DUPLICATE")]
    pub duplicate: String,
    #[serde(rename = "TRUVA_RM")]
    pub relationship_manager: String,
    #[serde(rename = "3P_LISTING_PLATFORM")]
    pub listing_platform: String,
    #[serde(rename = "CAMPAIGN_NAME")]
    pub campaign_name: String,
    #[serde(rename = "NUMBER_OF_ATTEMPTS")]
    pub number_of_attempts: i64,

    #[serde(rename = "USER_CREATED_TIME")]
    pub user_created_time: String,
    #[serde(rename = "CP_TAG_EXPIRY_DATE")]
    pub cp_tag_expiry_date: String,
    #[serde(rename = "NO_OF_PROPERTIES_VISITED")]
    pub properties_visited: i64,
    #[serde(rename = "LAST_VISITED_ON")]
    pub last_visited_on: String,
    #[serde(rename = "3P_SOCIETY_NAME")]
    pub society_name: String,

    #[serde(rename = "CAMPAIGN_ID")]
    pub campaign_id: String,
    #[serde(rename = "AD_SET_ID")]
    pub ad_set_id: String,
    #[serde(rename = "AD_SET_NAME")]
    pub ad_set_name: String,
    #[serde(rename = "AD_ID")]
    pub ad_id: String,
    #[serde(rename = "AD_NAME")]
    pub ad_name: String,

    #[serde(rename = "INTERESTED_IN_VISIT")]
    pub interested_in_visit: String,
    #[serde(rename = "PREFERENCES")]
    pub preferences: String,
    #[serde(rename = "USE_CASE")]
    pub use_case: String,
    #[serde(rename = "PREFERRED_AREA")]
    pub preferred_area: String,
    #[serde(rename = "CURRENT_STAY")]
    pub current_stay: String,
    #[serde(rename = "BUDGET")]
    pub budget: String,
    #[serde(rename = "PREFERRED_TIME_OF_VISIT")]
    pub preferred_time_of_visit: String,
    #[serde(rename = "NOT_QUALIFIED_REASON")]
    pub not_qualified_reason: String,
    #[serde(rename = "CLOSING_TIMELINES")]
    pub closing_timelines: String,

    #[serde(rename = "TAGGED_CHANNEL_PARTNER_NAME")]
    pub channel_partner_name: String,
    #[serde(rename = "TAGGED_CHANNEL_PARTNER_PHONE")]
    pub channel_partner_phone: String,

    #[serde(rename = "TRUVA_MICROMARKET")]
    pub micromarket: String,
    #[serde(rename = "DND")]
    pub dnd: String,
    #[serde(rename = "REFERRED_BY")]
    pub referred_by: String,
    #[serde(rename = "SPOUSE_NAME")]
    pub spouse_name: String,
    #[serde(rename = "SPOUSE_PHONE")]
    pub spouse_phone: String,

    #[serde(skip)]
    original: Option<TransformedRecord>,
}

impl OutboundPayload {
    /// The transformed record this payload was mapped from.
    pub fn original(&self) -> Option<&TransformedRecord> {
        self.original.as_ref()
    }

    /// Drop the debug copy of the transformed record.
    pub fn without_original(mut self) -> Self {
        self.original = None;
        self
    }
}

/// First present value of a fallback chain, `null` when none is.
fn first_of<'a>(record: &'a TransformedRecord, keys: &[&str]) -> &'a Value {
    keys.iter()
        .map(|key| record.get(key))
        .find(|value| is_truthy(value))
        .unwrap_or(&NULL)
}

fn text(record: &TransformedRecord, keys: &[&str]) -> String {
    stringify(first_of(record, keys))
}

fn count(record: &TransformedRecord, key: &str) -> i64 {
    to_integer(record.get(key)).unwrap_or(0)
}

fn full_name(record: &TransformedRecord) -> String {
    let display_name = first_of(record, &["Lead_Name"]);
    if is_truthy(display_name) {
        return stringify(display_name);
    }

    format!(
        "{} {}",
        text(record, &["First_Name"]),
        text(record, &["Last_Name"])
    )
    .trim()
    .to_owned()
}

/// Map a transformed lead to the marketing API contact schema.
pub fn map_outbound(record: &TransformedRecord) -> OutboundPayload {
    let ad_set = text(record, &["Ad_set"]);

    OutboundPayload {
        user_id: text(record, &["Lead_Id", "USER_ID"]),
        email: text(record, &["Email"]),
        mobile: last_10_digits(first_of(record, &["Phone", "MOBILE"])),
        user_source: text(record, &["Lead_Source"]),
        full_name: full_name(record),
        user_status: text(record, &["Lead_Status"]),
        duplicate: to_true_false_string(record.get("Duplicate_Status")).to_owned(),
        relationship_manager: text(record, &["Lead_Owner"]),
        listing_platform: text(record, &["Listing_Platform"]),
        campaign_name: text(record, &["Campaign"]),
        number_of_attempts: count(record, "No_Of_attempts"),

        user_created_time: date_only(record.get("Created_Time")),
        cp_tag_expiry_date: date_only(record.get("Tag_Expiry_Date")),
        properties_visited: count(record, "propertiesVisited"),
        last_visited_on: date_only(first_of(record, &["lastVisitedOn", "Last_Visited_On"])),
        society_name: text(record, &["Project_name", "Form_Name"]),

        campaign_id: text(record, &["Form_ID"]),
        ad_set_id: ad_set.clone(),
        ad_set_name: ad_set,
        ad_id: text(record, &["Ad_ID", "Form_ID"]),
        ad_name: text(record, &["Ad_Name"]),

        interested_in_visit: to_yes_no(record.get("Interested_in_visit")),
        preferences: text(record, &["Preferences"]),
        use_case: text(record, &["Use_Case"]),
        preferred_area: text(record, &["Preferred_Area"]),
        current_stay: text(record, &["Current_Stay"]),
        budget: text(record, &["Budget"]),
        preferred_time_of_visit: text(record, &["Preferred_time_of_Visit"]),
        not_qualified_reason: text(record, &["Not_Qualified_Reason"]),
        closing_timelines: text(record, &["Closing_Timelines"]),

        channel_partner_name: text(record, &["CP_Name", "CP_Contact_Name"]),
        channel_partner_phone: last_10_digits(record.get("CP_Phone")),

        micromarket: text(record, &["Truva_Micromarket"]),
        dnd: to_yes_no(record.get("DND")),
        referred_by: text(record, &["Referred_by"]),
        spouse_name: text(record, &["Spouse_Name"]),
        spouse_phone: last_10_digits(record.get("Spouse_Phone")),

        original: Some(record.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::transform;
    use serde_json::json;

    #[test]
    fn test_end_to_end_mapping() {
        let transformed = transform(&json!({
            "Lead_Id": "1",
            "Phone": "9876543210",
            "Email": "a@b.com",
            "Duplicate_Status": "Y",
        }));

        let payload = map_outbound(&transformed);

        assert_eq!(payload.mobile, "9876543210");
        assert_eq!(payload.duplicate, "true");
        assert_eq!(payload.email, "a@b.com");
        assert_eq!(payload.user_id, "1");
        assert_eq!(payload.number_of_attempts, 0);
        assert_eq!(payload.properties_visited, 0);
        assert_eq!(payload.last_visited_on, "");
        assert_eq!(payload.full_name, "");
    }

    #[test]
    fn test_serialized_payload_uses_api_field_names() {
        let transformed = transform(&json!({
            "Lead_Id": 42,
            "Listing_Platform": "99acres",
            "Project_name": "Green Acres",
            "No_Of_attempts": "4",
        }));

        let serialized = serde_json::to_value(map_outbound(&transformed)).unwrap();

        assert_eq!(serialized["USER_ID"], json!("42"));
        assert_eq!(serialized["3P_LISTING_PLATFORM"], json!("99acres"));
        assert_eq!(serialized["3P_SOCIETY_NAME"], json!("Green Acres"));
        assert_eq!(serialized["NUMBER_OF_ATTEMPTS"], json!(4));
        assert_eq!(serialized["DUPLICATE"], json!("false"));
        assert_eq!(serialized["DND"], json!(""));
        assert_eq!(serialized.as_object().unwrap().len(), 37);
    }

    #[test]
    fn test_original_record_is_never_serialized() {
        let transformed = transform(&json!({"Lead_Id": "1", "Email": "a@b.com"}));
        let payload = map_outbound(&transformed);

        assert_eq!(payload.original(), Some(&transformed));

        let serialized = serde_json::to_string(&payload).unwrap();
        assert!(!serialized.contains("original"));
        assert!(!serialized.contains("propertiesVisited"));
        assert!(!serialized.contains("Lead_Id"));
    }

    #[test]
    fn test_fallback_chains() {
        let transformed = transform(&json!({
            "USER_ID": "legacy-7",
            "MOBILE": "+91 98765 43210",
            "First_Name": " Asha ",
            "Last_Name": "",
            "Form_Name": "Spring Form",
            "Form_ID": "F-1",
            "CP_Contact_Name": "Ravi",
            "Last_Visited_On": "2024-03-02T08:00:00Z",
        }));

        let payload = map_outbound(&transformed);

        assert_eq!(payload.user_id, "legacy-7");
        assert_eq!(payload.mobile, "9876543210");
        assert_eq!(payload.full_name, "Asha");
        assert_eq!(payload.society_name, "Spring Form");
        assert_eq!(payload.campaign_id, "F-1");
        assert_eq!(payload.ad_id, "F-1");
        assert_eq!(payload.channel_partner_name, "Ravi");
        assert_eq!(payload.last_visited_on, "2024-03-02");
    }

    #[test]
    fn test_display_name_wins_over_first_and_last_name() {
        let transformed = transform(&json!({
            "Lead_Name": "Asha Rao",
            "First_Name": "A",
            "Last_Name": "R",
        }));

        assert_eq!(map_outbound(&transformed).full_name, "Asha Rao");
    }

    #[test]
    fn test_formatting_of_flags_dates_and_phones() {
        let transformed = transform(&json!({
            "Created_Time": "2024-01-05T20:00:00Z",
            "Tag_Expiry_Date": "2024-02-29",
            "Interested_in_visit": "yes",
            "DND": false,
            "CP_Phone": "080-1234-5678",
            "Spouse_Phone": "+1 415 555 0100",
            "Preferences": ["2BHK", "Gym"],
            "Ad_set": "AS-9",
            "visits": [
                {"propertyId": "A", "status": "completed", "visitDate": "2024-01-01"},
                {"propertyId": "B", "status": "completed", "visitDate": "2024-01-09T20:00:00Z"},
            ],
        }));

        let payload = map_outbound(&transformed);

        assert_eq!(payload.user_created_time, "2024-01-06");
        assert_eq!(payload.cp_tag_expiry_date, "2024-02-29");
        assert_eq!(payload.interested_in_visit, "yes");
        assert_eq!(payload.dnd, "no");
        assert_eq!(payload.channel_partner_phone, "8012345678");
        assert_eq!(payload.spouse_phone, "4155550100");
        assert_eq!(payload.preferences, "2BHK, Gym");
        assert_eq!(payload.ad_set_id, "AS-9");
        assert_eq!(payload.ad_set_name, "AS-9");
        assert_eq!(payload.properties_visited, 2);
        assert_eq!(payload.last_visited_on, "2024-01-10");
    }

    #[test]
    fn test_without_original() {
        let payload = map_outbound(&transform(&json!({"Lead_Id": "1"}))).without_original();
        assert_eq!(payload.original(), None);
        assert_eq!(payload.user_id, "1");
    }

    #[test]
    fn test_loosely_formatted_dates_are_reduced_to_days() {
        let payload = map_outbound(&transform(&json!({
            "Created_Time": "01/05/2024",
            "Tag_Expiry_Date": "Feb 10, 2024",
            "visits": [
                {"propertyId": "A", "status": "completed", "visitDate": "2024/03/02"},
            ],
        })));

        assert_eq!(payload.user_created_time, "2024-01-05");
        assert_eq!(payload.cp_tag_expiry_date, "2024-02-10");
        assert_eq!(payload.last_visited_on, "2024-03-02");
    }
}
