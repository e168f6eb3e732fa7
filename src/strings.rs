//! User-facing message catalogue.

pub fn get_string(key: &str) -> &'static str {
    match key {
        "pluginname" => "Marking",
        "markers" => "Markers",
        "pages" => "Pages",
        "criterion" => "Criterion",
        "delete" => "Delete",
        "marking" => "Marking",
        "saved" => "Changes saved",
        "transactionsuccessful" => "Transaction successful",
        "invalidid" => "Invalid marking instance",
        "invalidcourseid" => "Invalid course",
        "invalidcriterion" => "Invalid criterion",
        "invalidrubric" => "The grading method of this activity is not a rubric",
        "invalidaccess" => "You do not have permission to assign markers",
        "notloggedin" => "You must be logged in to access this page",
        "notenrolled" => "You are not enrolled in this course",
        "guestdenied" => "Guests cannot access this page",
        "addmarkers" => "Assign markers to criteria",
        "addpages" => "Assign pages to criteria",
        "markerscanseewholerubric" => "Markers can see the whole rubric",
        "markerscanseeallpages" => "Markers can see all pages",
        "markerscanseeselectedcriteria" => "Markers can see only the criteria assigned to them",
        "markerscanseepageswithcriteria" => {
            "Markers can see only the pages assigned to their criteria"
        }
        "markerscanseenothing" => {
            "Pages are assigned to criteria but no markers are: markers cannot see anything"
        }
        "required" => "Required",
        "invalidmarker" => "Selected user cannot grade in this course",
        "invalidpage" => "Page number out of range",
        "toomanyassociations" => "Too many associations in one submission",
        _ => "[[missing string]]",
    }
}
